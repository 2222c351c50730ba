//! Journal entries: CRUD scoped to the caller, background analysis, and read-only
//! aggregations (insights, word cloud).

pub mod analysis;
pub mod error;
pub mod insights;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod service;
pub mod store;
pub mod wordcloud;

use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

pub use analysis::AnalysisEngine;
pub use service::{EntryInput, JournalService};
pub use store::PgEntryStore;

use self::analysis::BatchReport;
use self::insights::JournalInsights;
use self::model::JournalEntry;
use self::wordcloud::{Timeframe, WordFrequency};
use crate::web::{
    ApiMessage, AppState,
    auth::{self, AuthUser, JsonAuthError},
    json_error, users,
};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/journal", post(create_entry).get(list_entries))
        .route("/api/journal/insights", get(insights))
        .route("/api/journal/wordcloud", get(word_cloud))
        .route("/api/journal/reprocess", post(reprocess_pending))
        .route(
            "/api/journal/:id",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/api/journal/:id/reprocess", post(reprocess_entry))
}

async fn caller(state: &AppState, headers: &HeaderMap, jar: &CookieJar) -> ApiResult<AuthUser> {
    auth::current_user_or_json_error(state, headers, jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))
}

async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(input): Json<EntryInput>,
) -> ApiResult<(StatusCode, Json<JournalEntry>)> {
    let user = caller(&state, &headers, &jar).await?;
    let entry = state
        .journal()
        .create(user.id, input)
        .await
        .map_err(|err| err.into_api("create journal entry", user.id, None))?;

    if let Err(err) = users::record_journal_day(state.pool_ref(), user.id, entry.date.date_naive()).await {
        error!(?err, user_id = %user.id, entry_id = %entry.id, "failed to update journaling streak");
    }

    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<Vec<JournalEntry>>> {
    let user = caller(&state, &headers, &jar).await?;
    state
        .journal()
        .list(user.id)
        .await
        .map(Json)
        .map_err(|err| err.into_api("fetch journal entries", user.id, None))
}

async fn get_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    AxumPath(entry_id): AxumPath<Uuid>,
) -> ApiResult<Json<JournalEntry>> {
    let user = caller(&state, &headers, &jar).await?;
    state
        .journal()
        .get(user.id, entry_id)
        .await
        .map(Json)
        .map_err(|err| err.into_api("fetch journal entry", user.id, Some(entry_id)))
}

async fn update_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    AxumPath(entry_id): AxumPath<Uuid>,
    Json(input): Json<EntryInput>,
) -> ApiResult<Json<JournalEntry>> {
    let user = caller(&state, &headers, &jar).await?;
    state
        .journal()
        .update(user.id, entry_id, input)
        .await
        .map(Json)
        .map_err(|err| err.into_api("update journal entry", user.id, Some(entry_id)))
}

async fn delete_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    AxumPath(entry_id): AxumPath<Uuid>,
) -> ApiResult<Json<ApiMessage>> {
    let user = caller(&state, &headers, &jar).await?;
    state
        .journal()
        .delete(user.id, entry_id)
        .await
        .map_err(|err| err.into_api("delete journal entry", user.id, Some(entry_id)))?;

    Ok(Json(ApiMessage::new("Journal entry deleted successfully")))
}

async fn insights(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<JournalInsights>> {
    let user = caller(&state, &headers, &jar).await?;
    state
        .journal()
        .insights(user.id)
        .await
        .map(Json)
        .map_err(|err| err.into_api("generate journal insights", user.id, None))
}

#[derive(Deserialize)]
struct WordCloudQuery {
    timeframe: Option<String>,
}

async fn word_cloud(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<WordCloudQuery>,
) -> ApiResult<Json<Vec<WordFrequency>>> {
    let user = caller(&state, &headers, &jar).await?;
    let timeframe = Timeframe::parse(query.timeframe.as_deref());
    state
        .journal()
        .word_cloud(user.id, timeframe)
        .await
        .map(Json)
        .map_err(|err| err.into_api("generate word cloud data", user.id, None))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchReprocessResponse {
    message: String,
    processed_count: usize,
    remaining_count: usize,
}

async fn reprocess_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<BatchReprocessResponse>> {
    let user = caller(&state, &headers, &jar).await?;
    let report = state
        .journal()
        .reprocess_pending(user.id)
        .await
        .map_err(|err| err.into_api("reprocess journal entries", user.id, None))?;

    let message = batch_message(report, state.journal().engine().is_available());
    info!(user_id = %user.id, processed = report.processed, remaining = report.remaining, "batch reprocess requested");

    Ok(Json(BatchReprocessResponse {
        message,
        processed_count: report.processed,
        remaining_count: report.remaining,
    }))
}

fn batch_message(report: BatchReport, available: bool) -> String {
    if report.processed == 0 && report.remaining == 0 {
        "No entries to process".to_string()
    } else if report.processed == 0 && !available {
        "Journal entry analysis is unavailable right now".to_string()
    } else {
        format!("Successfully processed {} entries", report.processed)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleReprocessResponse {
    message: &'static str,
    entry_id: Uuid,
    processed: bool,
}

async fn reprocess_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    AxumPath(entry_id): AxumPath<Uuid>,
) -> ApiResult<Json<SingleReprocessResponse>> {
    let user = caller(&state, &headers, &jar).await?;
    let (entry, _) = state
        .journal()
        .reanalyze(user.id, entry_id)
        .await
        .map_err(|err| err.into_api("reprocess journal entry", user.id, Some(entry_id)))?;

    let message = if entry.is_processed() {
        "Journal entry analysis completed"
    } else {
        "Journal entry analysis is unavailable right now"
    };

    Ok(Json(SingleReprocessResponse {
        message,
        entry_id: entry.id,
        processed: entry.is_processed(),
    }))
}
