//! Centralized model definitions
//!
//! All model metadata lives here: wire names, display names, reasoning
//! conventions, pricing, and router tiers.

use crate::demux::ReasoningStyle;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Cerebras,
    DeepSeek,
}

impl Provider {
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Cerebras => "Cerebras",
            Provider::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Cerebras => "CEREBRAS_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Cerebras => "https://api.cerebras.ai/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }
}

/// Position of a model in the auto-router's capability ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Cheapest,
    Mid,
    MostCapable,
    /// Selectable directly but never chosen by the router.
    Unrouted,
}

/// Per-million-token pricing in dollars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_cached: f64,
    pub input: f64,
    pub output: f64,
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model id (e.g. "deepseek-reasoner")
    pub id: &'static str,
    pub provider: Provider,
    /// Model name sent on the wire (same as `id` for these providers)
    pub api_name: &'static str,
    /// Human-readable display name shown in `modelInfo`
    pub display_name: &'static str,
    /// How this model delivers reasoning text
    pub reasoning: ReasoningStyle,
    pub tier: ModelTier,
    pub pricing: Pricing,
}

const FREE: Pricing = Pricing {
    input_cached: 0.0,
    input: 0.0,
    output: 0.0,
};

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "llama-3.1-8b",
            provider: Provider::Cerebras,
            api_name: "llama-3.1-8b",
            display_name: "Llama 3.1 (8B)",
            reasoning: ReasoningStyle::Plain,
            tier: ModelTier::Cheapest,
            pricing: FREE,
        },
        ModelDef {
            id: "llama-3.3-70b",
            provider: Provider::Cerebras,
            api_name: "llama-3.3-70b",
            display_name: "Llama 3.3 (70B)",
            reasoning: ReasoningStyle::Plain,
            tier: ModelTier::Mid,
            pricing: FREE,
        },
        ModelDef {
            id: "llama-4-scout-17b-16e-instruct",
            provider: Provider::Cerebras,
            api_name: "llama-4-scout-17b-16e-instruct",
            display_name: "Llama 4 Scout (17B)",
            // Scout interleaves reasoning between <think> tags in the
            // ordinary content field.
            reasoning: ReasoningStyle::InlineTags,
            tier: ModelTier::Unrouted,
            pricing: FREE,
        },
        ModelDef {
            id: "deepseek-chat",
            provider: Provider::DeepSeek,
            api_name: "deepseek-chat",
            display_name: "DeepSeek Chat",
            reasoning: ReasoningStyle::Plain,
            tier: ModelTier::Unrouted,
            pricing: Pricing {
                input_cached: 0.014,
                input: 0.14,
                output: 0.28,
            },
        },
        ModelDef {
            id: "deepseek-reasoner",
            provider: Provider::DeepSeek,
            api_name: "deepseek-reasoner",
            display_name: "DeepSeek Reasoner",
            reasoning: ReasoningStyle::SideChannel,
            tier: ModelTier::MostCapable,
            pricing: Pricing {
                input_cached: 0.14,
                input: 0.55,
                output: 2.19,
            },
        },
    ]
}

/// Look up a model definition by user-facing id
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
