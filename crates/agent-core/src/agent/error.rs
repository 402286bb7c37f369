use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// Stable machine-readable tag used in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::Connection(_) => "connection_error",
            AgentError::LLM(_) => "llm_error",
            AgentError::Cancelled => "cancelled",
        }
    }
}
