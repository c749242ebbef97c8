//! Streaming response demultiplexer
//!
//! Splits a backend's delta stream into ordered content / reasoning / usage
//! events. Three backend conventions are handled: plain content-only models,
//! models with an explicit side-channel reasoning field, and models that
//! inline reasoning between `<think>` / `</think>` sentinels in the ordinary
//! content field.
//!
//! The demultiplexer is a per-request state machine: one instance per
//! in-flight stream, exclusively owned by that request's task.

#[cfg(test)]
mod proptests;

use serde::Serialize;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// How a backend delivers reasoning text, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningStyle {
    /// Content only; everything routes straight to the content channel.
    Plain,
    /// Reasoning arrives in a dedicated delta field. Content is never
    /// tag-scanned, even if it contains tag-like substrings.
    SideChannel,
    /// Reasoning is inlined in the content field between sentinel tags.
    InlineTags,
}

/// One incremental fragment from a backend, already shape-dispatched by the
/// adapter. A single provider chunk may fan out into several deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Content { text: String },
    /// Explicit side-channel reasoning increment.
    Reasoning { text: String },
    /// Authoritative usage snapshot from the provider.
    Usage(ProviderUsage),
}

/// Usage fields a provider may report. Absent fields leave the locally
/// accumulated estimates in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cache_hit_tokens: Option<u64>,
    pub cache_miss_tokens: Option<u64>,
}

/// Running usage record for one response. Output tokens are reported as
/// content estimate + reasoning estimate, matching what the wire format
/// has always shown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached: bool,
    pub total_tokens: u64,
    pub cache_hit_tokens: u64,
    pub cache_miss_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content(String),
    Reasoning(String),
    Usage(TokenUsage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    Scanning,
    InReasoning,
}

/// Per-request demultiplexer. Feed deltas in order with [`StreamDemux::push`];
/// events come back in emission order and no byte is ever emitted twice.
#[derive(Debug)]
pub struct StreamDemux {
    style: ReasoningStyle,
    mode: ScanMode,
    /// Estimated token counters, ceil(chars / 4) per emitted fragment.
    content_estimate: u64,
    reasoning_estimate: u64,
    /// Provider-reported reasoning count, when one has arrived. Overrides
    /// the estimate instead of merging with it.
    reasoning_reported: Option<u64>,
    usage: TokenUsage,
}

/// The 4-chars-per-token heuristic used when the provider reports nothing.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

impl StreamDemux {
    pub fn new(style: ReasoningStyle) -> Self {
        Self {
            style,
            mode: ScanMode::Scanning,
            content_estimate: 0,
            reasoning_estimate: 0,
            reasoning_reported: None,
            usage: TokenUsage::default(),
        }
    }

    /// Apply one delta and return the events it produced, in order.
    pub fn push(&mut self, delta: Delta) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        match delta {
            Delta::Content { text } => match self.style {
                ReasoningStyle::InlineTags => self.scan_content(&text, &mut events),
                // Side-channel and plain backends bypass tag scanning
                // entirely; literal tag-like substrings stay content.
                ReasoningStyle::Plain | ReasoningStyle::SideChannel => {
                    self.emit_content(text, &mut events);
                }
            },
            Delta::Reasoning { text } => {
                // Independent of scan mode by construction: a backend uses
                // one reasoning convention or the other, never both.
                self.emit_reasoning_fragment(text, &mut events);
            }
            Delta::Usage(snapshot) => {
                self.merge_snapshot(&snapshot);
                events.push(StreamEvent::Usage(self.usage()));
            }
        }
        events
    }

    /// The running usage record, estimates folded in.
    pub fn usage(&self) -> TokenUsage {
        let mut usage = self.usage.clone();
        usage.reasoning_tokens = self.reasoning_reported.unwrap_or(self.reasoning_estimate);
        usage.output_tokens = self.content_estimate + usage.reasoning_tokens;
        usage
    }

    /// Terminal usage record once the delta sequence has ended.
    pub fn finish(self) -> TokenUsage {
        self.usage()
    }

    fn scan_content(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        // Tag search operates within this delta's text only. An opening or
        // closing sentinel split across two deltas is not reassembled; the
        // partial tag text falls through as ordinary content. Downstream
        // behavior depends on this staying true.
        let mut rest = text;
        loop {
            match self.mode {
                ScanMode::Scanning => {
                    let Some(start) = rest.find(THINK_OPEN) else {
                        self.emit_content(rest.to_string(), events);
                        return;
                    };
                    if start > 0 {
                        self.emit_content(rest[..start].to_string(), events);
                    }
                    self.mode = ScanMode::InReasoning;
                    rest = &rest[start + THINK_OPEN.len()..];
                }
                ScanMode::InReasoning => {
                    let Some(end) = rest.find(THINK_CLOSE) else {
                        // No closing tag in this delta: emit the remainder
                        // as reasoning and carry the mode over to the next
                        // delta.
                        self.emit_reasoning_fragment(rest.to_string(), events);
                        return;
                    };
                    let inner = &rest[..end];
                    self.emit_reasoning_fragment(inner.to_string(), events);
                    self.mode = ScanMode::Scanning;
                    rest = &rest[end + THINK_CLOSE.len()..];
                }
            }
        }
    }

    fn emit_content(&mut self, text: String, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        self.content_estimate += estimate_tokens(&text);
        events.push(StreamEvent::Content(text));
    }

    fn emit_reasoning_fragment(&mut self, text: String, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        self.reasoning_estimate += estimate_tokens(&text);
        events.push(StreamEvent::Reasoning(text));
    }

    /// Authoritative fields overwrite the running totals; reasoning and
    /// content counters stay locally accumulated unless the provider
    /// explicitly supplies them.
    fn merge_snapshot(&mut self, snapshot: &ProviderUsage) {
        if let Some(prompt) = snapshot.prompt_tokens {
            self.usage.input_tokens = prompt;
        }
        if let Some(total) = snapshot.total_tokens {
            self.usage.total_tokens = total;
        }
        if let Some(reasoning) = snapshot.reasoning_tokens {
            self.reasoning_reported = Some(reasoning);
        }
        if let Some(completion) = snapshot.completion_tokens {
            let reasoning = self.reasoning_reported.unwrap_or(self.reasoning_estimate);
            self.content_estimate = completion.saturating_sub(reasoning);
        }
        if let Some(hit) = snapshot.cache_hit_tokens {
            self.usage.cache_hit_tokens = hit;
            self.usage.cached = hit > 0;
        }
        if let Some(miss) = snapshot.cache_miss_tokens {
            self.usage.cache_miss_tokens = miss;
        }
    }
}
