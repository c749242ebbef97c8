//! OpenAI-compatible chat completions backend
//!
//! Both providers in the catalog (DeepSeek and Cerebras) speak the OpenAI
//! chat completions protocol, so one adapter covers them. Streaming
//! responses arrive as SSE: `data: {json}` lines terminated by a
//! `data: [DONE]` sentinel. A malformed data line is skipped with a
//! diagnostic and parsing resumes on the next line; one bad fragment never
//! aborts an otherwise healthy stream.

use super::{ChatBackend, ChatRequest, DeltaStream, LlmError, Role};
use crate::demux::{Delta, ProviderUsage};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAiCompatBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
    api_name: String,
}

impl OpenAiCompatBackend {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        api_name: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.into(),
            model_id: model_id.into(),
            api_name: api_name.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> ApiRequest {
        ApiRequest {
            model: self.api_name.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ApiRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("request timed out: {e}"))
                } else {
                    LlmError::network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body_text = response.text().await.unwrap_or_default();
        let message = format!("{} returned {status}: {body_text}", self.model_id);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::auth(message),
            StatusCode::TOO_MANY_REQUESTS => LlmError::rate_limit(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                LlmError::invalid_request(message)
            }
            s if s.is_server_error() => LlmError::server_error(message),
            _ => LlmError::unknown(message),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        let response = self.send(&self.build_request(request, true)).await?;
        let model_id = self.model_id.clone();
        let start = std::time::Instant::now();

        let stream = try_stream! {
            let mut chunks = response.bytes_stream();
            let mut line_buffer = String::new();
            let mut finished = false;

            while let Some(chunk) = chunks.next().await {
                let bytes = chunk
                    .map_err(|e| LlmError::network(format!("stream read failed: {e}")))?;
                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    let line = line.trim();
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();

                    if payload == "[DONE]" {
                        finished = true;
                        break;
                    }

                    for delta in parse_stream_payload(&model_id, payload) {
                        yield delta;
                    }
                }

                if finished {
                    break;
                }
            }

            tracing::info!(
                model = %model_id,
                duration_ms = %start.elapsed().as_millis(),
                "LLM stream completed"
            );
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let response = self.send(&self.build_request(request, false)).await?;

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::unknown(format!("malformed completion body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string();

        tracing::info!(
            model = %self.model_id,
            duration_ms = %start.elapsed().as_millis(),
            input_tokens = parsed.usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens = parsed.usage.as_ref().and_then(|u| u.completion_tokens).unwrap_or(0),
            "LLM request completed"
        );

        Ok(text)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Decode one SSE data payload into deltas. A chunk may carry content, a
/// side-channel reasoning increment, and a usage snapshot all at once; each
/// becomes its own delta so the demultiplexer dispatches on shape alone.
/// Unparseable payloads are logged and dropped.
fn parse_stream_payload(model_id: &str, payload: &str) -> Vec<Delta> {
    let chunk: ApiStreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(model = %model_id, error = %e, "skipping malformed stream line");
            return Vec::new();
        }
    };

    let mut deltas = Vec::new();
    if let Some(choice) = chunk.choices.first() {
        if let Some(reasoning) = &choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                deltas.push(Delta::Reasoning {
                    text: reasoning.clone(),
                });
            }
        }
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                deltas.push(Delta::Content {
                    text: content.clone(),
                });
            }
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(Delta::Usage(ProviderUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens),
            total_tokens: usage.total_tokens,
            cache_hit_tokens: usage.prompt_cache_hit_tokens,
            cache_miss_tokens: usage.prompt_cache_miss_tokens,
        }));
    }

    deltas
}

// ============================================================
// Wire types
// ============================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    delta: ApiStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStreamDelta {
    content: Option<String>,
    /// Side-channel reasoning field used by DeepSeek's reasoner models.
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    prompt_cache_hit_tokens: Option<u64>,
    prompt_cache_miss_tokens: Option<u64>,
    completion_tokens_details: Option<ApiCompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct ApiCompletionDetails {
    reasoning_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_only_chunk_parses_to_one_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hello "}}]}"#;
        assert_eq!(
            parse_stream_payload("m", payload),
            vec![Delta::Content {
                text: "Hello ".to_string()
            }]
        );
    }

    #[test]
    fn reasoning_chunk_parses_to_reasoning_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"","reasoning_content":"Step 1."}}]}"#;
        assert_eq!(
            parse_stream_payload("m", payload),
            vec![Delta::Reasoning {
                text: "Step 1.".to_string()
            }]
        );
    }

    #[test]
    fn usage_bearing_chunk_fans_out_into_content_and_usage() {
        let payload = r#"{
            "choices":[{"delta":{"content":"done"}}],
            "usage":{
                "prompt_tokens":100,
                "completion_tokens":20,
                "total_tokens":120,
                "prompt_cache_hit_tokens":64,
                "prompt_cache_miss_tokens":36
            }
        }"#;
        let deltas = parse_stream_payload("m", payload);
        assert_eq!(deltas.len(), 2);
        assert_eq!(
            deltas[0],
            Delta::Content {
                text: "done".to_string()
            }
        );
        assert_eq!(
            deltas[1],
            Delta::Usage(ProviderUsage {
                prompt_tokens: Some(100),
                completion_tokens: Some(20),
                reasoning_tokens: None,
                total_tokens: Some(120),
                cache_hit_tokens: Some(64),
                cache_miss_tokens: Some(36),
            })
        );
    }

    #[test]
    fn malformed_payload_is_skipped() {
        assert!(parse_stream_payload("m", "{not json").is_empty());
    }

    #[test]
    fn empty_delta_chunk_produces_nothing() {
        let payload = r#"{"choices":[{"delta":{}}]}"#;
        assert!(parse_stream_payload("m", payload).is_empty());
    }
}
