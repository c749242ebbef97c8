//! Conversation title generation using a fast/cheap model
//!
//! Produces a short title from the first query/response exchange. Failures
//! are expected and harmless: the caller always gets a usable string.

use crate::llm::{ChatBackend, ChatMessage, ChatRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const TITLE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates concise chat titles. \
     Keep titles under 50 characters.";

const TITLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TITLE_LENGTH: usize = 60;
/// Placeholder used whenever title generation cannot produce a real title.
pub const FALLBACK_TITLE: &str = "New Chat";

/// Generate a title for a conversation from its first exchange.
///
/// Returns the placeholder on timeout, backend error, or empty output —
/// title generation must never surface as a user-visible failure.
pub async fn generate_title(backend: Arc<dyn ChatBackend>, query: &str, response: &str) -> String {
    let request = ChatRequest::new(vec![
        ChatMessage::system(TITLE_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Generate a concise title for this chat based on the first query and response:\n\n\
             Query: {query}\n\nResponse: {response}"
        )),
    ]);

    let title = match timeout(TITLE_TIMEOUT, backend.complete(&request)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "title generation failed");
            return FALLBACK_TITLE.to_string();
        }
        Err(_) => {
            tracing::warn!("title generation timed out");
            return FALLBACK_TITLE.to_string();
        }
    };

    let title = title.trim().trim_matches('"').trim();
    if title.is_empty() {
        return FALLBACK_TITLE.to_string();
    }

    truncate_title(title)
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        return title.to_string();
    }
    let truncated: String = title.chars().take(MAX_TITLE_LENGTH - 3).collect();
    format!("{}...", truncated.trim_end())
}
