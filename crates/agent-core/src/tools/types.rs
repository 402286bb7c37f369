use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_type: default_tool_type(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// Arguments are an opaque structured value; only the provider interprets their shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub function: FunctionSchema,
}

impl ToolSchema {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            schema_type: "function".to_string(),
            function: FunctionSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotConnected,
    NotFound,
    InvalidArguments,
    Execution,
    Timeout,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Error { error: ToolFailure },
}

/// Outcome of exactly one issued [`ToolCall`], correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(call: &ToolCall, kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            outcome: ToolOutcome::Error {
                error: ToolFailure {
                    kind,
                    message: message.into(),
                },
            },
        }
    }

    pub fn from_error(call: &ToolCall, error: &ToolError) -> Self {
        Self::failure(call, error.kind(), error.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<ToolFailureKind> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Error { error } => Some(error.kind),
        }
    }

    /// Transcript text for the tool message the model sees.
    pub fn to_content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload } => match payload {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Error { error } => format!("Error: {}", error.message),
        }
    }
}
