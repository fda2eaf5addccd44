use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub const GENERIC_FAILURE: &str = "Failed to generate image";

/// The uploaded file could not be read or is not a decodable image.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Failed to parse file data")]
pub struct DecodeError;

/// Every way a single generate/edit call can fail. The UI shows `to_string()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Please enter a prompt describing what you want to generate or edit.")]
    EmptyPrompt,
    #[error("No content generated")]
    EmptyResponse,
    /// Model answered with text instead of an image; carried verbatim.
    #[error("{0}")]
    ModelRefusal(String),
    #[error("No image data found in response")]
    NoImageData,
    #[error("{0}")]
    Transport(String),
    #[error("Image generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl GenerationError {
    /// Normalizes any lower-level failure message into `Transport`.
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Transport(GENERIC_FAILURE.to_string())
        } else {
            Self::Transport(message)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("a generation is already in progress")]
    Busy,
    #[error("no generated image to download")]
    NoResult,
}

/// Error surface of the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("stored image payload is corrupt: {0}")]
    CorruptPayload(String),
    #[error("Image is too large (limit is {0} bytes)")]
    PayloadTooLarge(usize),
    #[error("generation task failed: {0}")]
    Task(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Generation(GenerationError::EmptyPrompt) => StatusCode::BAD_REQUEST,
            ApiError::Generation(_) => StatusCode::BAD_GATEWAY,
            ApiError::Session(SessionError::NotFound) | ApiError::Session(SessionError::NoResult) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Session(SessionError::Busy) => StatusCode::CONFLICT,
            ApiError::CorruptPayload(_) => StatusCode::BAD_GATEWAY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ {}", self);
        } else {
            tracing::warn!("⚠️ {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
