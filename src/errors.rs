use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Backend(String),
    #[error("{0}")]
    Internal(String),
}

impl From<BackendError> for AppError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Configuration(message) => AppError::Configuration(message),
            other => AppError::Backend(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenAiErrorEnvelope {
    pub error: OpenAiError,
}

#[derive(Debug, Serialize)]
pub struct OpenAiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl OpenAiErrorEnvelope {
    pub fn new(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error: OpenAiError {
                message: message.into(),
                error_type: error_type.to_owned(),
            },
        }
    }
}

/// Error body used by the native endpoints: `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct OllamaErrorEnvelope {
    pub error: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_request_error",
            AppError::Configuration(_) => "configuration_error",
            AppError::Backend(_) => "backend_error",
            AppError::Internal(_) => "server_error",
        }
    }

    /// Renders the error in the native surface's shape instead of the OpenAI envelope.
    pub fn into_ollama_response(self) -> Response {
        let status = self.status();
        let payload = OllamaErrorEnvelope {
            error: self.to_string(),
        };
        (status, Json(payload)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = OpenAiErrorEnvelope::new(self.error_type(), self.to_string());
        (status, Json(payload)).into_response()
    }
}
