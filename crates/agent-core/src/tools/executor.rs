use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tools::{ToolCall, ToolFailureKind, ToolSchema};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Provider not connected: {0}")]
    NotConnected(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolFailureKind {
        match self {
            ToolError::NotFound(_) => ToolFailureKind::NotFound,
            ToolError::NotConnected(_) => ToolFailureKind::NotConnected,
            ToolError::InvalidArguments(_) => ToolFailureKind::InvalidArguments,
            ToolError::Execution(_) => ToolFailureKind::Execution,
            ToolError::Timeout(_) => ToolFailureKind::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Session-scoped tool surface consumed by the turn loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools currently exposed to the model for `session_id`.
    async fn list_tools(&self, session_id: &str) -> Vec<ToolSchema>;

    async fn execute(&self, session_id: &str, call: &ToolCall) -> Result<Value>;

    /// Calls that share a lane must run one at a time, in request order.
    fn lane(&self, call: &ToolCall) -> String {
        call.function.name.clone()
    }
}

/// Tool arguments must be a JSON object; `null` is treated as no arguments.
pub fn parse_tool_args(arguments: &Value) -> Result<Value> {
    match arguments {
        Value::Object(_) => Ok(arguments.clone()),
        Value::Null => Ok(Value::Object(Default::default())),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(ToolError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            )),
            Err(e) => Err(ToolError::InvalidArguments(format!("Invalid JSON: {}", e))),
        },
        _ => Err(ToolError::InvalidArguments(
            "arguments must be a JSON object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    struct StaticExecutor {
        results: HashMap<String, Value>,
    }

    #[async_trait]
    impl ToolExecutor for StaticExecutor {
        async fn list_tools(&self, _session_id: &str) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn execute(&self, _session_id: &str, call: &ToolCall) -> Result<Value> {
            self.results
                .get(&call.function.name)
                .cloned()
                .ok_or_else(|| ToolError::NotFound(call.function.name.clone()))
        }
    }

    #[tokio::test]
    async fn static_executor_reports_missing_tool() {
        let executor = StaticExecutor {
            results: HashMap::from([("echo".to_string(), json!("hi"))]),
        };

        let ok = executor
            .execute("s1", &ToolCall::new("c1", "echo", json!({})))
            .await;
        assert_eq!(ok, Ok(json!("hi")));

        let missing = executor
            .execute("s1", &ToolCall::new("c2", "nope", json!({})))
            .await;
        assert_eq!(missing, Err(ToolError::NotFound("nope".to_string())));
    }

    #[test]
    fn default_lane_is_tool_name() {
        let executor = StaticExecutor {
            results: HashMap::new(),
        };
        assert_eq!(executor.lane(&ToolCall::new("c1", "echo", json!({}))), "echo");
    }

    #[test]
    fn parse_tool_args_accepts_objects_and_null() {
        assert_eq!(parse_tool_args(&json!({"a": 1})), Ok(json!({"a": 1})));
        assert_eq!(parse_tool_args(&Value::Null), Ok(json!({})));
    }

    #[test]
    fn parse_tool_args_reparses_raw_strings() {
        assert_eq!(
            parse_tool_args(&json!("{\"path\":\"a.txt\"}")),
            Ok(json!({"path": "a.txt"}))
        );
        assert!(matches!(
            parse_tool_args(&json!("{not json")),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse_tool_args(&json!([1, 2])),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn tool_error_maps_to_failure_kind() {
        assert_eq!(
            ToolError::NotConnected("fs".into()).kind(),
            ToolFailureKind::NotConnected
        );
        assert_eq!(
            ToolError::Timeout("slow".into()).kind(),
            ToolFailureKind::Timeout
        );
    }
}
