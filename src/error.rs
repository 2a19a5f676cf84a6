//! Error types for the MCA engine

use thiserror::Error;

/// Message returned when an orchestration request lacks a required field.
pub const REQUIRED_FIELDS_MESSAGE: &str = "sessionId, userId, and conversationTurns are required";

/// Errors that can occur while analysing turns or driving interventions
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to parse payload: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown intervention session: {0}")]
    UnknownSession(String),

    #[error("Intervention session {0} is already resolved")]
    SessionTerminal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// The validation failure for a request missing `sessionId`, `userId` or turns
    pub fn missing_required_fields() -> Self {
        EngineError::Validation(REQUIRED_FIELDS_MESSAGE.to_string())
    }

    /// Whether this error maps to a client-side (400-equivalent) failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::Parse(_) | EngineError::Json(_)
        )
    }
}

/// Errors raised by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
