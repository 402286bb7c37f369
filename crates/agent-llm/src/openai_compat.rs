//! OpenAI-compatible request and response shapes.
//!
//! Internal [`Message`] fields such as `id`, `pinned` and `created_at` never
//! reach the wire. Tool call arguments travel as JSON strings on the wire and
//! as structured values inside the crate.

use agent_core::{
    agent::Role,
    tools::{FunctionCall, ToolCall, ToolSchema},
    Message,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::{LLMError, Result};

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Raw argument text for the wire. Arguments kept as an unparsed string go back verbatim.
fn arguments_to_wire(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Parse raw argument text; unparsable text is kept as a JSON string.
pub fn arguments_from_wire(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn messages_to_openai_compat_json(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": role_name(m.role),
                "content": m.content,
            });

            if let Some(tool_call_id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(tool_call_id);
            }

            if let Some(tool_calls) = m.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
                msg["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": call.tool_type,
                            "function": {
                                "name": call.function.name,
                                "arguments": arguments_to_wire(&call.function.arguments),
                            }
                        })
                    })
                    .collect();
            }

            msg
        })
        .collect()
}

pub fn tools_to_openai_compat_json(tools: &[ToolSchema]) -> Vec<Value> {
    tools.iter().map(|t| json!(t)).collect()
}

/// Build a non-streaming chat completion request body.
pub fn build_openai_compat_body(
    model: &str,
    messages: &[Message],
    tools: &[ToolSchema],
    max_output_tokens: Option<u32>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_openai_compat_json(messages),
        "stream": false,
    });

    // Some compatible servers reject an empty tools array.
    if !tools.is_empty() {
        body["tools"] = json!(tools_to_openai_compat_json(tools));
    }

    if let Some(max_tokens) = max_output_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

#[derive(Debug, Deserialize)]
pub struct OpenAICompatCompletion {
    #[serde(default)]
    choices: Vec<OpenAICompatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatChoice {
    message: OpenAICompatMessage,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAICompatToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    tool_type: Option<String>,
    function: OpenAICompatFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Turn a completion response into the assistant message it carries.
pub fn parse_openai_compat_completion(data: &str) -> Result<Message> {
    let completion: OpenAICompatCompletion = serde_json::from_str(data)?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::Protocol("completion has no choices".to_string()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            tool_type: tc.tool_type.unwrap_or_else(|| "function".to_string()),
            function: FunctionCall {
                name: tc.function.name,
                arguments: arguments_from_wire(&tc.function.arguments),
            },
        })
        .collect();

    if tool_calls.is_empty() {
        return Ok(Message::assistant(
            choice.message.content.unwrap_or_default(),
            None,
        ));
    }

    let mut message = Message::tool_request(tool_calls);
    message.content = choice.message.content.filter(|c| !c.is_empty());
    Ok(message)
}
