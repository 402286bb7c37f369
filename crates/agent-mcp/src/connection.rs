use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::error::{ConnectionError, McpError, Result};
use crate::protocol::{Implementation, McpProtocolClient, McpTransport, ServerCapabilities};
use crate::types::{ConnectionKey, McpCallResult, ToolDescriptor};

/// A live, initialized session with one provider for one session.
pub struct Connection {
    key: ConnectionKey,
    client: McpProtocolClient,
    capabilities: ServerCapabilities,
    server_info: Implementation,
    instructions: Option<String>,
    connected_at: DateTime<Utc>,
    request_timeout_ms: u64,
    /// Calls on one connection run one at a time.
    call_gate: Mutex<()>,
}

impl Connection {
    /// Connect the transport and run the initialize handshake.
    ///
    /// On error the client is dropped, which stops its reader and, for stdio,
    /// kills the child process.
    pub async fn establish(
        key: ConnectionKey,
        config: &McpServerConfig,
        transport: Box<dyn McpTransport>,
    ) -> std::result::Result<Self, ConnectionError> {
        let client = McpProtocolClient::new(transport);
        client
            .connect()
            .await
            .map_err(|e| ConnectionError::from_mcp(&key, e))?;

        let init = match client.initialize(config.request_timeout_ms).await {
            Ok(init) => init,
            Err(e) => {
                if let Err(close_err) = client.disconnect().await {
                    debug!("Error closing {} after failed handshake: {}", key, close_err);
                }
                return Err(ConnectionError::from_mcp(&key, e));
            }
        };

        info!(
            "MCP provider initialized for {}: {} v{}",
            key, init.server_info.name, init.server_info.version
        );

        Ok(Self {
            key,
            client,
            capabilities: init.capabilities,
            server_info: init.server_info,
            instructions: init.instructions,
            connected_at: Utc::now(),
            request_timeout_ms: config.request_timeout_ms,
            call_gate: Mutex::new(()),
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn provider_id(&self) -> &str {
        &self.key.provider_id
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self.client.list_tools(self.request_timeout_ms).await?;
        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                provider_id: self.key.provider_id.clone(),
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect())
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<McpCallResult> {
        let _turn = self.call_gate.lock().await;
        if !self.is_alive() {
            return Err(McpError::Disconnected);
        }
        debug!("Calling {} on {}", tool_name, self.key);
        self.client
            .call_tool(tool_name, arguments, self.request_timeout_ms)
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping(self.request_timeout_ms).await
    }

    pub async fn close(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Error disconnecting {}: {}", self.key, e);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("server", &self.server_info.name)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
