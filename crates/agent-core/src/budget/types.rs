//! Core types for token budget management.

use serde::{Deserialize, Serialize};

/// Default safety margin as a percentage of context window (1%).
const DEFAULT_SAFETY_MARGIN_PERCENT: f64 = 0.01;
/// Minimum safety margin in tokens.
const MIN_SAFETY_MARGIN: u32 = 100;
/// Maximum safety margin in tokens.
const MAX_SAFETY_MARGIN: u32 = 2000;
/// A single message may use at most this share of the input budget by default.
const DEFAULT_MESSAGE_SHARE: u32 = 4;

/// Token budget configuration for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Maximum context window size for the model (input + output)
    pub max_context_tokens: u32,
    /// Maximum tokens reserved for model output
    pub max_output_tokens: u32,
    /// Safety margin for tokenizer estimation errors
    #[serde(default = "default_safety_margin")]
    pub safety_margin: u32,
    /// Ceiling for any single message; larger messages are clipped
    pub max_message_tokens: u32,
}

fn default_safety_margin() -> u32 {
    1000
}

impl TokenBudget {
    /// Create a new token budget with the specified parameters.
    pub fn new(max_context_tokens: u32, max_output_tokens: u32) -> Self {
        let safety_margin = calculate_safety_margin(max_context_tokens);
        Self::with_safety_margin(max_context_tokens, max_output_tokens, safety_margin)
    }

    /// Create a new token budget with explicit safety margin.
    pub fn with_safety_margin(
        max_context_tokens: u32,
        max_output_tokens: u32,
        safety_margin: u32,
    ) -> Self {
        let available = max_context_tokens
            .saturating_sub(max_output_tokens)
            .saturating_sub(safety_margin);
        Self {
            max_context_tokens,
            max_output_tokens,
            safety_margin,
            max_message_tokens: (available / DEFAULT_MESSAGE_SHARE).max(1),
        }
    }

    /// A plain input budget with no output reserve or margin.
    pub fn fixed(max_input_tokens: u32, max_message_tokens: u32) -> Self {
        Self {
            max_context_tokens: max_input_tokens,
            max_output_tokens: 0,
            safety_margin: 0,
            max_message_tokens,
        }
    }

    pub fn with_message_ceiling(mut self, max_message_tokens: u32) -> Self {
        self.max_message_tokens = max_message_tokens;
        self
    }

    /// Calculate available tokens for input (context window minus output reserve and safety margin).
    pub fn available_input_tokens(&self) -> u32 {
        self.max_context_tokens
            .saturating_sub(self.max_output_tokens)
            .saturating_sub(self.safety_margin)
    }

    /// Create a default budget for a model with the given context window.
    pub fn for_model(max_context_tokens: u32) -> Self {
        let max_output_tokens = calculate_max_output_tokens(max_context_tokens);
        Self::new(max_context_tokens, max_output_tokens)
    }
}

fn calculate_safety_margin(max_context_tokens: u32) -> u32 {
    let margin = (max_context_tokens as f64 * DEFAULT_SAFETY_MARGIN_PERCENT) as u32;
    margin.clamp(MIN_SAFETY_MARGIN, MAX_SAFETY_MARGIN)
}

/// Reserve 25% for output, capped at 16k.
fn calculate_max_output_tokens(max_context_tokens: u32) -> u32 {
    const MAX_OUTPUT_CAP: u32 = 16_384;
    let output_tokens = (max_context_tokens as f64 * 0.25) as u32;
    output_tokens.min(MAX_OUTPUT_CAP)
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::for_model(128_000)
    }
}

/// What a `fit` pass did to the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitReport {
    /// Messages whose content was truncated to the per-message ceiling
    pub clipped: usize,
    /// Messages removed by pruning
    pub removed: usize,
    /// Estimated tokens of the fitted transcript
    pub total_tokens: u32,
    /// Input budget the transcript was fitted against
    pub budget_limit: u32,
    /// Still over budget after every removable message was pruned
    pub over_budget: bool,
}

impl FitReport {
    pub fn usage_percentage(&self) -> f64 {
        if self.budget_limit == 0 {
            return 0.0;
        }
        (self.total_tokens as f64 / self.budget_limit as f64) * 100.0
    }
}

/// Result of fitting a transcript into a budget.
#[derive(Debug, Clone)]
pub struct FittedContext {
    pub messages: Vec<crate::agent::types::Message>,
    /// Input position of each kept message, ascending.
    pub kept: Vec<usize>,
    pub report: FitReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_input_subtracts_reserve_and_margin() {
        let budget = TokenBudget::with_safety_margin(10_000, 2_000, 500);
        assert_eq!(budget.available_input_tokens(), 7_500);
        assert_eq!(budget.max_message_tokens, 1_875);
    }

    #[test]
    fn for_model_caps_output_reserve() {
        let budget = TokenBudget::for_model(200_000);
        assert_eq!(budget.max_output_tokens, 16_384);
        assert_eq!(budget.safety_margin, 2_000);
    }

    #[test]
    fn fixed_budget_uses_whole_window() {
        let budget = TokenBudget::fixed(300, 50);
        assert_eq!(budget.available_input_tokens(), 300);
        assert_eq!(budget.max_message_tokens, 50);
    }

    #[test]
    fn usage_percentage_handles_zero_limit() {
        let report = FitReport::default();
        assert_eq!(report.usage_percentage(), 0.0);
    }
}
