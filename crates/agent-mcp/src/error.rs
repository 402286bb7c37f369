use thiserror::Error;

use crate::types::ConnectionKey;

/// Transport and protocol level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server disconnected")]
    Disconnected,
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, McpError>;

/// Failures surfaced to callers of `ConnectionRegistry::connect`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider is disabled: {0}")]
    Disabled(String),

    #[error("Provider {provider} is missing configuration: {detail}")]
    MissingConfig { provider: String, detail: String },

    #[error("Handshake failed for {key}: {message}")]
    Handshake { key: ConnectionKey, message: String },

    #[error("Timed out after {timeout_ms}ms connecting {key}")]
    Timeout { key: ConnectionKey, timeout_ms: u64 },

    #[error("Transport failed for {key}: {message}")]
    Transport { key: ConnectionKey, message: String },

    #[error("Gave up connecting after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Only transport, handshake and timeout failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Handshake { .. }
                | ConnectionError::Timeout { .. }
                | ConnectionError::Transport { .. }
        )
    }

    pub(crate) fn from_mcp(key: &ConnectionKey, error: McpError) -> Self {
        match error {
            McpError::Transport(message) => ConnectionError::Transport {
                key: key.clone(),
                message,
            },
            McpError::Disconnected => ConnectionError::Transport {
                key: key.clone(),
                message: "server disconnected during handshake".to_string(),
            },
            McpError::InvalidConfig(detail) => ConnectionError::MissingConfig {
                provider: key.provider_id.clone(),
                detail,
            },
            other => ConnectionError::Handshake {
                key: key.clone(),
                message: other.to_string(),
            },
        }
    }
}

/// A model-facing tool name that does not decode to `(provider, tool)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed tool name {name:?}: {reason}")]
pub struct MalformedToolNameError {
    pub name: String,
    pub reason: &'static str,
}

impl MalformedToolNameError {
    pub(crate) fn new(name: &str, reason: &'static str) -> Self {
        Self {
            name: name.to_string(),
            reason,
        }
    }
}
