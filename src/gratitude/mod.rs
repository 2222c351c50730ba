//! Daily gratitude lists, one per user per calendar day.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::web::{
    ApiMessage, AppState,
    auth::{self, AuthUser, JsonAuthError},
    json_error,
};

const RECENT_DAYS: u64 = 7;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/gratitude", post(save_today))
        .route("/api/gratitude/today", get(today))
        .route("/api/gratitude/recent", get(recent))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct GratitudeDay {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    #[sqlx(rename = "day")]
    date: NaiveDate,
    #[sqlx(rename = "items")]
    entries: Vec<String>,
}

#[derive(Deserialize)]
pub struct GratitudeInput {
    #[serde(default)]
    entries: Vec<String>,
}

async fn caller(state: &AppState, headers: &HeaderMap, jar: &CookieJar) -> ApiResult<AuthUser> {
    auth::current_user_or_json_error(state, headers, jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))
}

async fn today(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<GratitudeDay>> {
    let user = caller(&state, &headers, &jar).await?;
    let day = Utc::now().date_naive();

    let found = sqlx::query_as::<_, GratitudeDay>(
        "SELECT id, day, items FROM gratitude_entries WHERE user_id = $1 AND day = $2",
    )
    .bind(user.id)
    .bind(day)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to fetch gratitude entry");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch gratitude entry")
    })?;

    Ok(Json(found.unwrap_or(GratitudeDay {
        id: None,
        date: day,
        entries: Vec::new(),
    })))
}

async fn recent(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<Vec<GratitudeDay>>> {
    let user = caller(&state, &headers, &jar).await?;
    let today = Utc::now().date_naive();
    let since = today.checked_sub_days(Days::new(RECENT_DAYS)).unwrap_or(today);

    sqlx::query_as::<_, GratitudeDay>(
        "SELECT id, day, items FROM gratitude_entries WHERE user_id = $1 AND day >= $2 ORDER BY day DESC",
    )
    .bind(user.id)
    .bind(since)
    .fetch_all(state.pool_ref())
    .await
    .map(Json)
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to fetch gratitude entries");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch gratitude entries")
    })
}

async fn save_today(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(input): Json<GratitudeInput>,
) -> ApiResult<Json<GratitudeDay>> {
    let user = caller(&state, &headers, &jar).await?;
    let items = normalize_items(input.entries);
    if items.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "At least one gratitude entry is required",
        ));
    }

    sqlx::query_as::<_, GratitudeDay>(
        "INSERT INTO gratitude_entries (id, user_id, day, items)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id, day) DO UPDATE SET items = EXCLUDED.items, updated_at = NOW()
         RETURNING id, day, items",
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(Utc::now().date_naive())
    .bind(&items)
    .fetch_one(state.pool_ref())
    .await
    .map(Json)
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to save gratitude entry");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save gratitude entry")
    })
}

fn normalize_items(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
