pub mod config;
pub mod runner;
pub mod service;
pub mod types;

pub use config::AgentLoopConfig;
pub use runner::{LoopState, TurnLoop};
pub use service::Orchestrator;
pub use types::{AbortReason, ChatRequest, ChatResponse, ChatStatus, ErrorEnvelope};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_core::budget::{ModelLimit, ModelLimitsRegistry, TokenBudget};

    use crate::config::AgentLoopConfig;

    #[test]
    fn agent_loop_config_default() {
        let config = AgentLoopConfig::default();
        assert!(config.token_budget.is_none());
        assert!(config.model_name.is_none());
        assert!(config.model_timeout > Duration::ZERO);
        assert!(config.tool_timeout > Duration::ZERO);
    }

    #[test]
    fn explicit_budget_wins_over_model_limits() {
        let limits = ModelLimitsRegistry::new();
        let config = AgentLoopConfig {
            token_budget: Some(TokenBudget::fixed(500, 100)),
            model_name: Some("gpt-4".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_budget(&limits), TokenBudget::fixed(500, 100));
    }

    #[test]
    fn budget_follows_model_limits() {
        let mut limits = ModelLimitsRegistry::new();
        limits.add_limit(ModelLimit::new("house-model", 10_000));
        let config = AgentLoopConfig {
            model_name: Some("house-model".to_string()),
            ..Default::default()
        };

        assert_eq!(config.resolve_budget(&limits).max_context_tokens, 10_000);
        assert_eq!(
            AgentLoopConfig::default().resolve_budget(&limits),
            TokenBudget::default()
        );
    }
}
