pub mod cerebras;
pub mod mock;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::models::{BackendCompletion, BackendRequest};

/// Raw text lines of a streaming response, in arrival order, without line terminators.
///
/// Dropping the stream releases the underlying connection.
pub type BackendLineStream = BoxStream<'static, Result<String, BackendError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError>;
    async fn open_stream(&self, request: BackendRequest) -> Result<BackendLineStream, BackendError>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Configuration(String),
    #[error("backend returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Short label used for the `stage`-style metric dimensions.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Configuration(_) => "configuration",
            BackendError::Http { .. } => "http_status",
            BackendError::Unavailable(_) => "unavailable",
            BackendError::Timeout(_) => "timeout",
            BackendError::InvalidResponse(_) => "invalid_response",
        }
    }
}
