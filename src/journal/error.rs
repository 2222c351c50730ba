use axum::{Json, http::StatusCode};
use thiserror::Error;
use tracing::{error, field::display};
use uuid::Uuid;

use crate::web::{ApiMessage, json_error};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal entry not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl JournalError {
    pub fn validation(message: impl Into<String>) -> Self {
        JournalError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            JournalError::NotFound => StatusCode::NOT_FOUND,
            JournalError::Validation(_) => StatusCode::BAD_REQUEST,
            JournalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert into the JSON error body. Store failures are logged with the operation, the
    /// caller and, when there is one, the entry.
    pub fn into_api(
        self,
        operation: &'static str,
        user_id: Uuid,
        entry_id: Option<Uuid>,
    ) -> (StatusCode, Json<ApiMessage>) {
        match self {
            JournalError::Store(err) => {
                error!(
                    ?err,
                    operation,
                    %user_id,
                    entry_id = entry_id.map(display),
                    "journal operation failed"
                );
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to {operation}"),
                )
            }
            other => json_error(other.status(), other.to_string()),
        }
    }
}
