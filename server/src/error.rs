use axum::http::StatusCode;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] tts_core::TtsError),
}

impl ApiError {
    /// Status code carried in WebSocket error events.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::TtsError(tts_core::TtsError::EmptyText) => StatusCode::BAD_REQUEST,
            ApiError::TtsError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
