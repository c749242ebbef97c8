//! LLM backend abstraction
//!
//! Every backend is driven through the same shape regardless of vendor:
//! given a linearized message list, a model identifier, and a temperature,
//! it yields an asynchronous sequence of deltas for the demultiplexer.

mod error;
mod models;
mod openai;
mod registry;
mod types;

pub use error::LlmError;
pub use models::{all_models, find_model, ModelDef, ModelTier, Provider};
pub use openai::OpenAiCompatBackend;
pub use registry::{LlmConfig, ModelRegistry};
pub use types::{ChatMessage, ChatRequest, Role};

use crate::demux::Delta;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, LlmError>> + Send>>;

/// Common interface for chat model backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming completion. The returned stream yields deltas in
    /// provider order until the backend signals completion or the transport
    /// fails.
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError>;

    /// Make a single non-streaming completion and return the message text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// The catalog id of the model this backend drives.
    fn model_id(&self) -> &str;
}
