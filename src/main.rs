use std::net::SocketAddr;

use ollama_cerebras_proxy::config::ProxyConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ollama_cerebras_proxy=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let state = ollama_cerebras_proxy::build_state(config)?;
    let app = ollama_cerebras_proxy::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "proxy listening");

    axum::serve(listener, app).await?;
    Ok(())
}
