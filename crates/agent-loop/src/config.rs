use std::sync::Arc;
use std::time::Duration;

use agent_core::budget::{HeuristicTokenCounter, ModelLimitsRegistry, SharedTokenCounter, TokenBudget};

/// Turn bound for requests that do not set their own.
pub const DEFAULT_MAX_TURNS: usize = 8;

/// Configuration for the turn loop.
#[derive(Clone)]
pub struct AgentLoopConfig {
    /// Token budget for context fitting (defaults to the model's limits)
    pub token_budget: Option<TokenBudget>,
    /// Model name used to look up the budget when none is given
    pub model_name: Option<String>,
    pub token_counter: SharedTokenCounter,
    /// Bound on one model completion
    pub model_timeout: Duration,
    /// Outer bound on one tool call, on top of the provider's request timeout
    pub tool_timeout: Duration,
}

impl AgentLoopConfig {
    /// The explicit budget, or the limits of the configured model.
    pub fn resolve_budget(&self, limits: &ModelLimitsRegistry) -> TokenBudget {
        match (&self.token_budget, &self.model_name) {
            (Some(budget), _) => budget.clone(),
            (None, Some(model)) => limits.budget_for_model(model),
            (None, None) => TokenBudget::default(),
        }
    }
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            token_budget: None,
            model_name: None,
            token_counter: Arc::new(HeuristicTokenCounter::with_defaults()),
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(180),
        }
    }
}

impl std::fmt::Debug for AgentLoopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoopConfig")
            .field("token_budget", &self.token_budget)
            .field("model_name", &self.model_name)
            .field("model_timeout", &self.model_timeout)
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}
