pub mod backend;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod state;
pub mod transcoder;
pub mod translate;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use backend::cerebras::CerebrasClient;
use config::ProxyConfig;
use tracing::{info, warn};

pub fn build_state(config: ProxyConfig) -> Result<state::AppState, std::io::Error> {
    let client = CerebrasClient::new(&config.backend).map_err(std::io::Error::other)?;

    if config.backend.api_key.is_none() {
        warn!("CEREBRAS_API_KEY is not set; every completion request will fail until it is");
    }
    info!(
        backend_model = %config.backend.model,
        base_url = %config.backend.base_url,
        request_timeout_secs = config.backend.request_timeout.as_secs(),
        stream_idle_timeout_secs = ?config.backend.stream_idle_timeout.map(|limit| limit.as_secs()),
        "backend client configured"
    );

    Ok(state::AppState::new(config, Arc::new(client)))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/api/version", get(handlers::version))
        .route("/api/tags", get(handlers::tags))
        .route("/api/show", post(handlers::show))
        .route("/api/ps", get(handlers::running))
        .route("/api/generate", post(handlers::ollama_generate))
        .route("/api/chat", post(handlers::ollama_chat))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .with_state(state)
}
