use super::*;
use serde_json::json;

#[test]
fn test_message_creation() {
    let msg = Message::user("Hello");
    assert_eq!(msg.content.as_deref(), Some("Hello"));
    assert!(matches!(msg.role, Role::User));
    assert!(!msg.id.is_empty());
    assert!(!msg.is_pinned());
}

#[test]
fn test_system_message_is_pinned() {
    let msg = Message::system("You are helpful");
    assert!(msg.is_pinned());

    // Even if the flag is cleared, the role keeps it pinned.
    assert!(msg.with_pinned(false).is_pinned());
}

#[test]
fn test_tool_request_has_null_content() {
    let msg = Message::tool_request(vec![ToolCall::new("call-1", "2_fs_read", json!({}))]);
    assert!(msg.content.is_none());
    assert!(msg.has_tool_calls());
    assert_eq!(msg.text(), "");

    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["role"], "assistant");
    assert!(value["content"].is_null());
    assert_eq!(value["tool_calls"][0]["type"], "function");
}

#[test]
fn test_message_deserializes_without_id() {
    let msg: Message = serde_json::from_value(json!({
        "role": "tool",
        "content": "42",
        "tool_call_id": "call-9"
    }))
    .unwrap();

    assert!(!msg.id.is_empty());
    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.tool_call_id.as_deref(), Some("call-9"));
    assert!(!msg.pinned);
}

#[test]
fn test_tool_call_arguments_are_structured() {
    let call: ToolCall = serde_json::from_value(json!({
        "id": "call-1",
        "function": { "name": "search", "arguments": { "query": "rust", "limit": 3 } }
    }))
    .unwrap();

    assert_eq!(call.tool_type, "function");
    assert_eq!(call.function.arguments["limit"], 3);
}

#[test]
fn test_tool_result_serialization() {
    let call = ToolCall::new("call-1", "search", json!({}));

    let ok = ToolResult::success(&call, json!({"hits": 2}));
    let value = serde_json::to_value(&ok).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["payload"]["hits"], 2);
    assert_eq!(ok.to_content(), r#"{"hits":2}"#);

    let err = ToolResult::failure(&call, ToolFailureKind::NotConnected, "fs is not connected");
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["kind"], "not_connected");
    assert_eq!(err.to_content(), "Error: fs is not connected");
    assert_eq!(err.failure_kind(), Some(ToolFailureKind::NotConnected));
}

#[test]
fn test_tool_result_message_correlates() {
    let call = ToolCall::new("call-7", "search", json!({}));
    let result = ToolResult::success(&call, json!("plain text"));
    let msg = Message::from_tool_result(&result);

    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.tool_call_id.as_deref(), Some("call-7"));
    assert_eq!(msg.text(), "plain text");
}

#[test]
fn test_tool_schema_creation() {
    let schema = ToolSchema::function(
        "2_fs_read",
        "Read a file",
        json!({"type": "object", "properties": {}}),
    );

    let value = serde_json::to_value(&schema).unwrap();
    assert_eq!(value["type"], "function");
    assert_eq!(value["function"]["name"], "2_fs_read");
}

#[test]
fn test_agent_error_kinds() {
    assert_eq!(AgentError::InvalidRequest("x".into()).kind(), "invalid_request");
    assert_eq!(AgentError::Connection("x".into()).kind(), "connection_error");
    assert_eq!(AgentError::Cancelled.kind(), "cancelled");
}

#[test]
fn test_agent_event_serialization() {
    let event = AgentEvent::TurnStarted {
        turn: 1,
        max_turns: 8,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "turn_started");
    assert_eq!(value["max_turns"], 8);
}

#[test]
fn test_fit_with_default_counter() {
    let messages = vec![Message::system("sys"), Message::user("hello")];
    let fitted = fit(messages, &TokenBudget::default(), &HeuristicTokenCounter::default());
    assert_eq!(fitted.messages.len(), 2);
    assert!(!fitted.report.over_budget);
}

#[test]
fn test_model_budget_lookup() {
    let mut registry = budget::ModelLimitsRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let loaded = tokio_test::block_on(registry.load_overrides(dir.path().join("limits.json")));
    assert_eq!(loaded.unwrap(), 0);

    let budget = registry.budget_for_model("gpt-4");
    assert_eq!(budget.max_context_tokens, 8_192);
    assert!(budget.available_input_tokens() < 8_192);
}
