use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConnectionError, McpError, Result};

/// Root MCP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

fn default_version() -> u32 {
    1
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            version: 1,
            servers: Vec::new(),
        }
    }
}

impl McpConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        let config: McpConfig = serde_json::from_str(content)
            .map_err(|e| McpError::InvalidConfig(format!("Invalid MCP config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load provider configuration from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            McpError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        tracing::info!(
            "Loaded {} MCP provider(s) from {}",
            config.servers.len(),
            path.display()
        );
        Ok(config)
    }

    /// Provider ids must be unique and non-empty.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(McpError::InvalidConfig(
                    "provider id must not be empty".to_string(),
                ));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(McpError::InvalidConfig(format!(
                    "duplicate provider id: {}",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// Single MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier for this server
    pub id: String,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether this server is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Transport configuration
    pub transport: TransportConfig,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Connection retry configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// List of allowed tools (empty = all allowed)
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// List of denied tools
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60000 // 60 seconds
}

impl McpServerConfig {
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            transport: TransportConfig::Stdio(StdioConfig {
                command: command.into(),
                args,
                cwd: None,
                env: HashMap::new(),
                required_env: Vec::new(),
                startup_timeout_ms: default_startup_timeout(),
            }),
            request_timeout_ms: default_request_timeout(),
            reconnect: ReconnectConfig::default(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
        }
    }

    /// Whether discovery should expose `tool_name` from this provider.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        if !self.allowed_tools.is_empty() && !self.allowed_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        !self.denied_tools.iter().any(|t| t == tool_name)
    }

    /// Time allowed for transport setup plus the initialize handshake.
    pub fn startup_timeout_ms(&self) -> u64 {
        match &self.transport {
            TransportConfig::Stdio(stdio) => stdio.startup_timeout_ms,
            TransportConfig::Sse(sse) => sse.connect_timeout_ms,
        }
    }

    /// Refuse to launch a disabled provider or one missing a required variable.
    pub fn check_launchable(&self) -> std::result::Result<(), ConnectionError> {
        if !self.enabled {
            return Err(ConnectionError::Disabled(self.id.clone()));
        }
        if let TransportConfig::Stdio(stdio) = &self.transport {
            let missing: Vec<&str> = stdio
                .required_env
                .iter()
                .filter(|name| !stdio.env.contains_key(*name) && std::env::var_os(name).is_none())
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(ConnectionError::MissingConfig {
                    provider: self.id.clone(),
                    detail: format!("missing environment variables: {}", missing.join(", ")),
                });
            }
        }
        Ok(())
    }
}

/// Transport configuration variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Sse(SseConfig),
}

/// Stdio transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Command to execute
    pub command: String,
    /// Arguments for the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Variables that must be set, here or in the process environment
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Startup timeout in milliseconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
}

fn default_startup_timeout() -> u64 {
    20000 // 20 seconds
}

/// SSE transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// SSE endpoint URL
    pub url: String,
    /// Additional headers
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10000 // 10 seconds
}

/// HTTP header configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

/// Connection retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// When false, a connect makes a single attempt
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Maximum connection attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Backoff before retry number `retry` (1-based), doubling up to the cap.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        self.initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms)
    }
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30000
}

fn default_max_attempts() -> u32 {
    3
}

/// Lookup from provider id to launch configuration.
pub trait ProviderCatalog: Send + Sync {
    fn resolve(&self, provider_id: &str) -> Option<McpServerConfig>;

    fn provider_ids(&self) -> Vec<String>;
}

impl ProviderCatalog for McpConfig {
    fn resolve(&self, provider_id: &str) -> Option<McpServerConfig> {
        self.servers.iter().find(|s| s.id == provider_id).cloned()
    }

    fn provider_ids(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.id.clone()).collect()
    }
}
