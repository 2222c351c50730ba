use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};

use crate::{
    gratitude, journal,
    web::{AppState, users},
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(users::router())
        .merge(journal::router())
        .merge(gratitude::router())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
