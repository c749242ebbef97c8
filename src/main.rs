//! Tangent - branching-conversation LLM chat server
//!
//! A Rust backend holding conversations as node graphs, streaming model
//! responses through a reasoning demultiplexer, and relaying session
//! events between long-running requests.

mod api;
mod demux;
mod graph;
mod llm;
mod relay;
mod router;
mod title;

use api::{create_router, AppState};
use llm::{LlmConfig, ModelRegistry};
use router::RouterClient;
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tangent=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let port: u16 = std::env::var("TANGENT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let registry = ModelRegistry::new(&llm_config);

    if registry.has_models() {
        tracing::info!(
            models = ?registry.available_models(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set CEREBRAS_API_KEY or DEEPSEEK_API_KEY.");
    }

    let router_client = RouterClient::from_env();

    // Create application state
    let state = AppState::new(registry, router_client);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state).layer(cors).layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Tangent server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
