//! Context window sizes per model.
//!
//! Built-in sizes cover common models; a JSON file of overrides can be layered on top.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::budget::types::TokenBudget;

/// Built-in context window sizes. Matching falls back to the longest contained pattern.
pub const KNOWN_MODEL_LIMITS: &[(&str, u32)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-opus", 200_000),
    ("claude-3-haiku", 200_000),
    ("claude-sonnet-4", 200_000),
    ("llama3", 8_192),
    ("qwen2.5", 32_768),
];

pub const DEFAULT_CONTEXT_TOKENS: u32 = 128_000;

/// A user-supplied limit for models matching `model_pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimit {
    pub model_pattern: String,
    pub max_context_tokens: u32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub safety_margin: Option<u32>,
    #[serde(default)]
    pub max_message_tokens: Option<u32>,
}

impl ModelLimit {
    pub fn new(model_pattern: impl Into<String>, max_context_tokens: u32) -> Self {
        Self {
            model_pattern: model_pattern.into(),
            max_context_tokens,
            max_output_tokens: None,
            safety_margin: None,
            max_message_tokens: None,
        }
    }

    /// Turn the limit into a budget, filling unset fields with the defaults of `TokenBudget`.
    pub fn to_budget(&self) -> TokenBudget {
        let base = TokenBudget::for_model(self.max_context_tokens);
        let output = self.max_output_tokens.unwrap_or(base.max_output_tokens);
        let margin = self.safety_margin.unwrap_or(base.safety_margin);
        let budget = TokenBudget::with_safety_margin(self.max_context_tokens, output, margin);
        match self.max_message_tokens {
            Some(ceiling) => budget.with_message_ceiling(ceiling),
            None => budget,
        }
    }
}

/// Model limits with user overrides taking priority over the built-in table.
#[derive(Debug, Clone, Default)]
pub struct ModelLimitsRegistry {
    overrides: HashMap<String, ModelLimit>,
}

impl ModelLimitsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a JSON array of `ModelLimit`. A missing file is not an error.
    pub async fn load_overrides(&mut self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let limits: Vec<ModelLimit> = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let count = limits.len();
        for limit in limits {
            self.add_limit(limit);
        }

        tracing::info!("Loaded {} model limit overrides from {:?}", count, path);
        Ok(count)
    }

    pub fn add_limit(&mut self, limit: ModelLimit) {
        self.overrides.insert(limit.model_pattern.clone(), limit);
    }

    /// Resolve a model name: exact override, exact built-in, longest contained override,
    /// longest contained built-in.
    pub fn get(&self, model: &str) -> Option<ModelLimit> {
        if let Some(limit) = self.overrides.get(model) {
            return Some(limit.clone());
        }
        if let Some((_, tokens)) = KNOWN_MODEL_LIMITS.iter().find(|(p, _)| *p == model) {
            return Some(ModelLimit::new(model, *tokens));
        }

        let best_override = self
            .overrides
            .values()
            .filter(|limit| model.contains(limit.model_pattern.as_str()))
            .max_by(|a, b| {
                a.model_pattern
                    .len()
                    .cmp(&b.model_pattern.len())
                    .then_with(|| b.model_pattern.cmp(&a.model_pattern))
            });
        if let Some(limit) = best_override {
            return Some(limit.clone());
        }

        KNOWN_MODEL_LIMITS
            .iter()
            .filter(|(pattern, _)| model.contains(pattern))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(pattern, tokens)| ModelLimit::new(*pattern, *tokens))
    }

    pub fn budget_for_model(&self, model: &str) -> TokenBudget {
        match self.get(model) {
            Some(limit) => limit.to_budget(),
            None => {
                tracing::debug!("No context limit known for {}, using default", model);
                TokenBudget::for_model(DEFAULT_CONTEXT_TOKENS)
            }
        }
    }
}
