//! HTTP API for the tangent server

mod handlers;
mod ndjson;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::graph::GraphStore;
use crate::llm::ModelRegistry;
use crate::relay::SessionRelay;
use crate::router::RouterClient;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<GraphStore>,
    pub registry: Arc<ModelRegistry>,
    pub router: Arc<RouterClient>,
    pub relay: SessionRelay,
}

impl AppState {
    pub fn new(registry: ModelRegistry, router: RouterClient) -> Self {
        Self {
            graph: Arc::new(GraphStore::new()),
            registry: Arc::new(registry),
            router: Arc::new(router),
            relay: SessionRelay::new(),
        }
    }
}
