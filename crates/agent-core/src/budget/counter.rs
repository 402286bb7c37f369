//! Token counting for budget management.
//!
//! Heuristic estimation only (chars/4 + 10% margin). Estimates are monotonic
//! in content length and deterministic.

use crate::agent::types::Message;
use std::sync::Arc;

/// Trait for token counting implementations.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a single message.
    fn count_message(&self, message: &Message) -> u32;

    /// Count tokens in multiple messages.
    fn count_messages(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(self.count_message(m)))
    }

    /// Count tokens in a plain text string.
    fn count_text(&self, text: &str) -> u32;
}

/// Heuristic token counter using character-based estimation.
///
/// Uses the approximation: tokens ≈ characters / 4, with a 10% safety margin
/// plus additional overhead for message metadata (role, ids, etc.).
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    /// Characters per token ratio (default: 4)
    chars_per_token: f64,
    /// Safety margin multiplier (default: 1.1 = 10% extra)
    safety_margin: f64,
    /// Metadata overhead per message in tokens
    metadata_overhead: u32,
    /// Cost of a message whose content is null
    null_content_cost: u32,
}

impl HeuristicTokenCounter {
    /// Create a new heuristic counter with custom parameters.
    pub fn new(chars_per_token: f64, safety_margin: f64, metadata_overhead: u32) -> Self {
        Self {
            chars_per_token,
            safety_margin,
            metadata_overhead,
            null_content_cost: 4,
        }
    }

    /// Create with default parameters (chars/4 + 10% margin + 10 metadata overhead).
    pub fn with_defaults() -> Self {
        Self::new(4.0, 1.1, 10)
    }

    pub fn with_null_content_cost(mut self, cost: u32) -> Self {
        self.null_content_cost = cost;
        self
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_message(&self, message: &Message) -> u32 {
        let content_tokens = match message.content.as_deref() {
            Some(content) => self.count_text(content),
            None => self.null_content_cost,
        };

        let tool_calls_tokens = message
            .tool_calls
            .as_ref()
            .map(|tc| {
                tc.iter()
                    .map(|c| {
                        // id + name + arguments + type overhead
                        self.count_text(&c.function.arguments.to_string())
                            .saturating_add(self.count_text(&c.id))
                            .saturating_add(self.count_text(&c.function.name))
                            .saturating_add(5)
                    })
                    .fold(0u32, |acc, x| acc.saturating_add(x))
            })
            .unwrap_or(0);

        let tool_call_id_tokens = message
            .tool_call_id
            .as_ref()
            .map(|id| self.count_text(id).saturating_add(3))
            .unwrap_or(0);

        content_tokens
            .saturating_add(tool_calls_tokens)
            .saturating_add(tool_call_id_tokens)
            .saturating_add(self.metadata_overhead)
    }

    fn count_text(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count() as f64;
        let base_tokens = char_count / self.chars_per_token;
        let adjusted_tokens = base_tokens * self.safety_margin;

        adjusted_tokens.ceil() as u32
    }
}

/// Arc-wrapped token counter for easy sharing.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCall;
    use serde_json::json;

    #[test]
    fn heuristic_counter_counts_text() {
        let counter = HeuristicTokenCounter::default();

        // "Hello, world!" = 13 chars -> 13/4 * 1.1 ≈ 3.57 -> 4 tokens
        assert_eq!(counter.count_text("Hello, world!"), 4);
    }

    #[test]
    fn heuristic_counter_counts_empty_text() {
        let counter = HeuristicTokenCounter::default();
        assert_eq!(counter.count_text(""), 0);
    }

    #[test]
    fn null_content_costs_a_constant() {
        let counter = HeuristicTokenCounter::default().with_null_content_cost(7);
        let a = Message::tool_request(vec![ToolCall::new("c1", "t", json!({}))]);
        let mut b = a.clone();
        b.content = Some(String::new());

        assert_eq!(counter.count_message(&a), counter.count_message(&b) + 7);
    }

    #[test]
    fn cost_is_monotonic_in_content_length() {
        let counter = HeuristicTokenCounter::default();
        let mut previous = 0;
        for len in 0..200 {
            let cost = counter.count_message(&Message::user("x".repeat(len)));
            assert!(cost >= previous, "cost dropped at length {}", len);
            previous = cost;
        }
    }

    #[test]
    fn cost_is_stable() {
        let counter = HeuristicTokenCounter::default();
        let message = Message::user("same input, same cost");
        assert_eq!(
            counter.count_message(&message),
            counter.count_message(&message.clone())
        );
    }

    #[test]
    fn heuristic_counter_counts_tool_calls() {
        let counter = HeuristicTokenCounter::default();
        let message = Message::assistant(
            "Let me search",
            Some(vec![ToolCall::new("call_123", "search", json!({"query": "test"}))]),
        );

        let tokens = counter.count_message(&message);
        assert!(tokens >= 15, "Expected at least 15 tokens, got {}", tokens);
    }

    #[test]
    fn heuristic_counter_counts_multiple_messages() {
        let counter = HeuristicTokenCounter::default();
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there", None),
        ];

        let sum: u32 = messages.iter().map(|m| counter.count_message(m)).sum();
        assert_eq!(counter.count_messages(&messages), sum);
    }

    #[test]
    fn custom_chars_per_token() {
        let counter = HeuristicTokenCounter::new(2.0, 1.0, 0);
        assert_eq!(counter.count_text("test"), 2);
    }
}
