//! Common error types for the text-to-image server and client

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned when a generate request carries no usable prompt
pub const PROMPT_REQUIRED: &str = "Prompt is required";

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", PROMPT_REQUIRED)]
    PromptRequired,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Inference error: {0}")]
    Inference(String),

    #[cfg(feature = "flux")]
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("{status} - {body}")]
    Server { status: u16, body: String },

    #[error("Image data not found in response")]
    MissingImage,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body, `{"error": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    /// HTTP status this error maps to when returned from a handler
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::PromptRequired | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
