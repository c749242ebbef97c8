//! API request and response types

use crate::demux::TokenUsage;
use crate::graph::ChatNode;
use serde::{Deserialize, Serialize};

/// Request body for the streaming chat endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub conversation_id: String,
    pub parent_id: Option<String>,
    pub query: String,
    /// Name of an attached document, recorded on the node as metadata.
    pub attachment_name: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub auto_route: bool,
    #[serde(default = "default_show_reasoning")]
    pub show_reasoning: bool,
}

fn default_show_reasoning() -> bool {
    true
}

/// One NDJSON line on the chat-stream wire
#[derive(Debug, Serialize)]
pub struct StreamLine {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(rename = "modelInfo")]
    pub model_info: ModelInfo,
}

/// Model identity and running usage, attached to every stream line
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub usage: TokenUsage,
}

/// Request for a non-streaming completion
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub model: String,
}

/// Response from the non-streaming completion endpoint
#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub response: String,
}

/// Request for a conversation title
#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub query: String,
    pub response: String,
}

/// Response with a generated conversation title
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

/// Response when a conversation is created
#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub id: String,
}

/// Full node map for one conversation
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: String,
    pub nodes: Vec<ChatNode>,
}

/// Root-to-tip node id path for a selected node
#[derive(Debug, Serialize)]
pub struct ContextPathResponse {
    pub path: Vec<String>,
}

/// Request to append an event to a session log
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPushRequest {
    pub session_id: Option<String>,
    pub event: Option<serde_json::Value>,
}

/// Generic acknowledgement
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn new() -> Self {
        Self { ok: true }
    }
}

/// One catalog entry in the model list
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    /// Whether this model emits a reasoning channel
    pub reasoning: bool,
    /// Whether an API key for this model's provider is configured
    pub available: bool,
    pub pricing: PricingInfo,
}

/// Per-million-token pricing in dollars
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub input_cached: f64,
    pub input: f64,
    pub output: f64,
}

/// Response for the model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelEntry>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
