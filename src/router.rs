//! Auto-router client
//!
//! Asks an external scoring service how complex a query is and maps the
//! score onto the model capability ladder. The router is an enhancement,
//! not correctness-critical: any failure falls back to the cheapest model
//! and is never surfaced to the user as fatal.

use crate::llm::{ModelRegistry, ModelTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scores above this pick the most capable model.
const MOST_CAPABLE_THRESHOLD: f64 = 0.2;
/// Scores above this (but not the top threshold) pick the mid tier. The
/// value is the scoring model's published decision boundary.
const MID_TIER_THRESHOLD: f64 = 0.1159;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    /// Complexity score in [0, 1]
    score: f64,
}

/// Map a complexity score onto a model id.
pub fn pick_model(score: f64) -> &'static str {
    if score > MOST_CAPABLE_THRESHOLD {
        ModelRegistry::model_for_tier(ModelTier::MostCapable)
    } else if score > MID_TIER_THRESHOLD {
        ModelRegistry::model_for_tier(ModelTier::Mid)
    } else {
        ModelRegistry::model_for_tier(ModelTier::Cheapest)
    }
}

pub struct RouterClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl RouterClient {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("ROUTER_URL").ok())
    }

    /// Choose a model for the given query text. Falls back to the cheapest
    /// model when the router is unconfigured, unreachable, or returns
    /// anything unexpected.
    pub async fn route(&self, query: &str) -> &'static str {
        match self.score(query).await {
            Ok(score) => {
                let model = pick_model(score);
                tracing::debug!(score, model, "auto-router selected model");
                model
            }
            Err(reason) => {
                tracing::warn!(%reason, "auto-router unavailable, using cheapest model");
                ModelRegistry::cheapest_model()
            }
        }
    }

    async fn score(&self, query: &str) -> Result<f64, String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| "ROUTER_URL not configured".to_string())?;

        let response = self
            .client
            .post(format!("{}/predict", base.trim_end_matches('/')))
            .json(&PredictRequest { prompt: query })
            .send()
            .await
            .map_err(|e| format!("router request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("router returned {}", response.status()));
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed router response: {e}"))?;

        Ok(parsed.score.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_map_onto_the_capability_ladder() {
        assert_eq!(pick_model(0.9), "deepseek-reasoner");
        assert_eq!(pick_model(0.21), "deepseek-reasoner");
        assert_eq!(pick_model(0.2), "llama-3.3-70b"); // boundary is exclusive
        assert_eq!(pick_model(0.15), "llama-3.3-70b");
        assert_eq!(pick_model(0.1159), "llama-3.1-8b"); // boundary is exclusive
        assert_eq!(pick_model(0.05), "llama-3.1-8b");
        assert_eq!(pick_model(0.0), "llama-3.1-8b");
    }

    #[tokio::test]
    async fn unconfigured_router_falls_back_to_cheapest() {
        let router = RouterClient::new(None);
        assert_eq!(router.route("anything").await, "llama-3.1-8b");
    }
}
