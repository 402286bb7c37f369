//! Inbound chat contract.

use agent_core::agent::Role;
use agent_core::tools::{ToolCall, ToolResult};
use agent_core::{AgentError, Message};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_TURNS;

fn default_true() -> bool {
    true
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub messages: Vec<Message>,
    #[serde(default = "default_true")]
    pub use_tools: bool,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Providers to connect for the session before the first turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            use_tools: true,
            max_turns: DEFAULT_MAX_TURNS,
            providers: Vec::new(),
        }
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.use_tools = false;
        self
    }

    /// Reject requests the loop cannot run.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.session_id.trim().is_empty() {
            return Err(AgentError::InvalidRequest("session id is empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(AgentError::InvalidRequest("message list is empty".to_string()));
        }
        if self.max_turns == 0 {
            return Err(AgentError::InvalidRequest(
                "max turns must be at least 1".to_string(),
            ));
        }
        for (index, message) in self.messages.iter().enumerate() {
            let correlated = message
                .tool_call_id
                .as_deref()
                .is_some_and(|id| !id.is_empty());
            if message.role == Role::Tool && !correlated {
                return Err(AgentError::InvalidRequest(format!(
                    "tool message at index {} has no tool call id",
                    index
                )));
            }
        }
        if let Some(call_id) = first_unanswered_call(&self.messages) {
            return Err(AgentError::InvalidRequest(format!(
                "tool call {:?} has no tool result",
                call_id
            )));
        }
        Ok(())
    }
}

/// The first requested tool call that no later tool message answers.
fn first_unanswered_call(messages: &[Message]) -> Option<&str> {
    let mut pending: Vec<&str> = Vec::new();
    for message in messages {
        if let Some(calls) = &message.tool_calls {
            pending.extend(calls.iter().map(|call| call.id.as_str()));
        }
        if message.role == Role::Tool {
            if let Some(id) = message.tool_call_id.as_deref() {
                if let Some(pos) = pending.iter().position(|pending_id| *pending_id == id) {
                    pending.remove(pos);
                }
            }
        }
    }
    pending.first().copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AbortReason {
    TurnLimit,
    ModelError(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::TurnLimit => write!(f, "turn limit reached"),
            AbortReason::ModelError(message) => write!(f, "model error: {}", message),
        }
    }
}

/// Final or best partial answer plus the full call trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// `None` only when a run aborted before the model produced any content.
    pub message: Option<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub status: ChatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub turns: usize,
}

impl ChatResponse {
    pub fn is_completed(&self) -> bool {
        self.status == ChatStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl From<AgentError> for ErrorEnvelope {
    fn from(error: AgentError) -> Self {
        Self {
            error: ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults_from_json() {
        let request: ChatRequest = serde_json::from_value(json!({
            "sessionId": "s1",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        assert!(request.use_tools);
        assert_eq!(request.max_turns, DEFAULT_MAX_TURNS);
        assert!(request.providers.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_requests() {
        let empty_session = ChatRequest::new(" ", vec![Message::user("hi")]);
        let no_messages = ChatRequest::new("s1", Vec::new());
        let zero_turns = ChatRequest::new("s1", vec![Message::user("hi")]).with_max_turns(0);
        let mut orphan = Message::tool_result("", "data");
        orphan.tool_call_id = None;
        let uncorrelated = ChatRequest::new("s1", vec![Message::user("hi"), orphan]);

        for request in [empty_session, no_messages, zero_turns, uncorrelated] {
            assert!(matches!(
                request.validate(),
                Err(AgentError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn rejects_tool_calls_without_results() {
        let dangling = ChatRequest::new(
            "s1",
            vec![
                Message::user("hi"),
                Message::tool_request(vec![ToolCall::new("c9", "2_fs_read_file", json!({}))]),
            ],
        );
        let err = dangling.validate().unwrap_err();
        assert!(matches!(&err, AgentError::InvalidRequest(msg) if msg.contains("c9")));

        let partly_answered = ChatRequest::new(
            "s1",
            vec![
                Message::user("hi"),
                Message::tool_request(vec![
                    ToolCall::new("c1", "2_fs_read_file", json!({})),
                    ToolCall::new("c2", "2_fs_read_file", json!({})),
                ]),
                Message::tool_result("c1", "ok"),
            ],
        );
        assert!(partly_answered.validate().is_err());
    }

    #[test]
    fn accepts_answered_tool_calls() {
        let request = ChatRequest::new(
            "s1",
            vec![
                Message::user("hi"),
                Message::tool_request(vec![ToolCall::new("c1", "2_fs_read_file", json!({}))]),
                Message::user("while you wait"),
                Message::tool_result("c1", "ok"),
            ],
        );
        assert!(request.validate().is_ok());
    }

    #[test]
    fn envelope_carries_error_kind() {
        let envelope = ErrorEnvelope::from(AgentError::Connection("fs down".into()));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": {"kind": "connection_error", "message": "Connection error: fs down"}})
        );
    }

    #[test]
    fn aborted_response_serializes_reason() {
        let response = ChatResponse {
            message: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            status: ChatStatus::Aborted,
            abort_reason: Some(AbortReason::TurnLimit),
            turns: 3,
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["abortReason"], json!({"kind": "turn_limit"}));
        assert_eq!(value["turns"], 3);
    }
}
