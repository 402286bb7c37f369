use crate::tools::{ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "generate_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub role: Role,
    /// `None` when the message only records a tool request.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Pinned messages survive budget pruning. System messages are always pinned.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            id: generate_id(),
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            pinned: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        let mut message = Self::new(Role::Assistant, Some(content.into()));
        message.tool_calls = tool_calls;
        message
    }

    /// Assistant message that only records requested tool calls.
    pub fn tool_request(tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::new(Role::Assistant, None);
        message.tool_calls = Some(tool_calls);
        message
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, Some(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn system(content: impl Into<String>) -> Self {
        let mut message = Self::new(Role::System, Some(content.into()));
        message.pinned = true;
        message
    }

    pub fn from_tool_result(result: &ToolResult) -> Self {
        Self::tool_result(result.tool_call_id.clone(), result.to_content())
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned || self.role == Role::System
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}
