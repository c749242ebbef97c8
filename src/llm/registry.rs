//! Model registry for managing available backends

use super::{all_models, ChatBackend, ModelDef, ModelTier, OpenAiCompatBackend, Provider};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub cerebras_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    /// Base URL overrides, mostly for pointing tests at a stub server
    pub cerebras_base_url: Option<String>,
    pub deepseek_base_url: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            cerebras_api_key: std::env::var(Provider::Cerebras.api_key_env_var()).ok(),
            deepseek_api_key: std::env::var(Provider::DeepSeek.api_key_env_var()).ok(),
            cerebras_base_url: std::env::var("CEREBRAS_BASE_URL").ok(),
            deepseek_base_url: std::env::var("DEEPSEEK_BASE_URL").ok(),
        }
    }
}

/// Registry of available chat backends, keyed by user-facing model id
pub struct ModelRegistry {
    backends: HashMap<String, Arc<dyn ChatBackend>>,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        let mut backends: HashMap<String, Arc<dyn ChatBackend>> = HashMap::new();

        for def in all_models() {
            if let Some(backend) = Self::try_create_backend(def, config) {
                backends.insert(def.id.to_string(), backend);
            }
        }

        Self { backends }
    }

    /// Create an empty registry for testing purposes
    pub fn new_empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend directly. Tests use this to inject fakes.
    pub fn insert(&mut self, model_id: impl Into<String>, backend: Arc<dyn ChatBackend>) {
        self.backends.insert(model_id.into(), backend);
    }

    fn try_create_backend(
        def: &ModelDef,
        config: &LlmConfig,
    ) -> Option<Arc<dyn ChatBackend>> {
        let (api_key, base_url) = match def.provider {
            Provider::Cerebras => (
                config.cerebras_api_key.as_ref()?,
                config
                    .cerebras_base_url
                    .clone()
                    .unwrap_or_else(|| def.provider.default_base_url().to_string()),
            ),
            Provider::DeepSeek => (
                config.deepseek_api_key.as_ref()?,
                config
                    .deepseek_base_url
                    .clone()
                    .unwrap_or_else(|| def.provider.default_base_url().to_string()),
            ),
        };

        if api_key.is_empty() {
            return None;
        }

        Some(Arc::new(OpenAiCompatBackend::new(
            api_key.clone(),
            base_url,
            def.id,
            def.api_name,
        )))
    }

    /// Get a backend by model id
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(model_id).cloned()
    }

    pub fn has_models(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn available_models(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Model id for a router tier. The catalog guarantees one model per
    /// routed tier.
    pub fn model_for_tier(tier: ModelTier) -> &'static str {
        all_models()
            .iter()
            .find(|m| m.tier == tier)
            .map(|m| m.id)
            .unwrap_or("llama-3.1-8b")
    }

    /// The model used for auxiliary calls (titles, direct answers) when the
    /// caller does not specify one.
    pub fn cheapest_model() -> &'static str {
        Self::model_for_tier(ModelTier::Cheapest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_without_keys_is_empty() {
        let registry = ModelRegistry::new(&LlmConfig::default());
        assert!(!registry.has_models());
        assert!(registry.get("deepseek-chat").is_none());
    }

    #[test]
    fn registry_creates_backends_per_provider_key() {
        let config = LlmConfig {
            deepseek_api_key: Some("test-key".to_string()),
            ..LlmConfig::default()
        };
        let registry = ModelRegistry::new(&config);
        assert_eq!(
            registry.available_models(),
            vec!["deepseek-chat", "deepseek-reasoner"]
        );
        assert!(registry.get("llama-3.1-8b").is_none());
    }

    #[test]
    fn tier_lookup_matches_the_catalog() {
        assert_eq!(ModelRegistry::model_for_tier(ModelTier::Cheapest), "llama-3.1-8b");
        assert_eq!(ModelRegistry::model_for_tier(ModelTier::Mid), "llama-3.3-70b");
        assert_eq!(
            ModelRegistry::model_for_tier(ModelTier::MostCapable),
            "deepseek-reasoner"
        );
    }
}
