use agent_core::tools::ToolSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one provider connection within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub session_id: String,
    pub provider_id: String,
}

impl ConnectionKey {
    pub fn new(session_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            provider_id: provider_id.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session={:?} provider={:?}",
            self.session_id, self.provider_id
        )
    }
}

/// A tool as advertised by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub provider_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A provider tool under its globally unique, model-facing name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespacedTool {
    pub name: String,
    pub descriptor: ToolDescriptor,
}

impl NamespacedTool {
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema::function(
            self.name.clone(),
            self.descriptor.description.clone(),
            self.descriptor.input_schema.clone(),
        )
    }
}

/// Result of calling an MCP tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<McpContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpCallResult {
    /// Flatten content items into the text placed in the transcript.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                McpContentItem::Text { text } => text.clone(),
                McpContentItem::Image { data, mime_type } => {
                    format!("[Image: {} ({} bytes)]", mime_type, data.len())
                }
                McpContentItem::Resource { resource } => match &resource.text {
                    Some(text) => format!("[Resource {}]: {}", resource.uri, text),
                    None => format!("[Resource {}]", resource.uri),
                },
                McpContentItem::Other => "[Unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: McpResource,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Event emitted by the connection registry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Connected {
        key: ConnectionKey,
        server_name: String,
    },
    Disconnected {
        key: ConnectionKey,
    },
    ConnectFailed {
        key: ConnectionKey,
        error: String,
    },
}
