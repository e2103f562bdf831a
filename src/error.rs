use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::{DraftError, EntryId, MemberId};

/// Engine-level error taxonomy.
///
/// `AlreadyRecorded` and `AlreadyReversed` are deliberately absent: they
/// are success outcomes (`AppendOutcome` / `ReverseOutcome`), not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid sponsor {0}: unknown, suspended, or not placed")]
    InvalidSponsor(MemberId),

    #[error("member {0} already has a placement")]
    AlreadyPlaced(MemberId),

    #[error("unknown member {0}")]
    UnknownMember(MemberId),

    #[error("ledger entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("invalid draft: {0}")]
    InvalidDraft(#[from] DraftError),

    #[error("no open slot within depth {max_depth} for sponsor {sponsor_id}")]
    PlacementExhausted {
        sponsor_id: MemberId,
        max_depth: u32,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transient store failure; callers retry with backoff. The engine
    /// itself performs no hidden retries that could duplicate side
    /// effects.
    #[error("store unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    /// Whether a caller may safely retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidSponsor(_) | EngineError::InvalidDraft(_) => {
                AppError::BadRequest(err.to_string())
            }
            EngineError::AlreadyPlaced(_) => AppError::Conflict(err.to_string()),
            EngineError::UnknownMember(_) | EngineError::EntryNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            EngineError::PlacementExhausted { .. } => AppError::Conflict(err.to_string()),
            EngineError::Serialization(e) => AppError::Internal(e.to_string()),
            EngineError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
