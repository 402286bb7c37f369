use agent_core::{tools::ToolSchema, Message};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, LLMError>;

/// The model completion service, seen through a single request/response call.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Produce the next assistant message for the transcript.
    ///
    /// The returned message has role assistant. Requested tool calls are carried
    /// in `tool_calls` with structured arguments.
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message>;

    /// Model identifier used to look up context limits, when known.
    fn model_name(&self) -> Option<&str> {
        None
    }
}
