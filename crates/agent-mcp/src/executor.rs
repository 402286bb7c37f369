use agent_core::tools::{parse_tool_args, ToolCall, ToolError, ToolExecutor, ToolSchema};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use crate::discovery;
use crate::error::McpError;
use crate::namespace;
use crate::registry::ConnectionRegistry;

/// Tool executor backed by the session's MCP connections.
///
/// Tool names are namespaced; each call is routed to the provider encoded in
/// its name. Providers are never connected implicitly.
pub struct McpToolExecutor {
    registry: Arc<ConnectionRegistry>,
}

impl McpToolExecutor {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

fn to_tool_error(tool_name: &str, error: McpError) -> ToolError {
    match error {
        McpError::Timeout(message) => ToolError::Timeout(format!("{}: {}", tool_name, message)),
        McpError::Disconnected => {
            ToolError::NotConnected(format!("{}: provider disconnected", tool_name))
        }
        other => {
            error!("MCP tool {} failed: {}", tool_name, other);
            ToolError::Execution(format!("MCP error: {}", other))
        }
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    async fn list_tools(&self, session_id: &str) -> Vec<ToolSchema> {
        discovery::catalog(&self.registry, session_id)
            .await
            .iter()
            .map(|tool| tool.to_schema())
            .collect()
    }

    async fn execute(&self, session_id: &str, call: &ToolCall) -> Result<Value, ToolError> {
        let name = &call.function.name;
        let (provider_id, tool_name) =
            namespace::decode(name).map_err(|e| ToolError::NotFound(e.to_string()))?;

        let connection = self
            .registry
            .get(session_id, provider_id)
            .ok_or_else(|| ToolError::NotConnected(provider_id.to_string()))?;

        if let Some(config) = self.registry.provider_config(provider_id) {
            if !config.is_tool_allowed(tool_name) {
                return Err(ToolError::NotFound(name.clone()));
            }
        }

        let arguments = parse_tool_args(&call.function.arguments)?;
        debug!("Executing MCP tool {} on {}", tool_name, connection.key());

        let result = connection
            .call_tool(tool_name, arguments)
            .await
            .map_err(|e| to_tool_error(name, e))?;

        let text = result.to_text();
        if result.is_error {
            return Err(ToolError::Execution(text));
        }
        Ok(Value::String(text))
    }

    /// Calls on one provider connection share a lane.
    fn lane(&self, call: &ToolCall) -> String {
        match namespace::decode(&call.function.name) {
            Ok((provider_id, _)) => provider_id.to_string(),
            Err(_) => call.function.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McpConfig;
    use crate::testing::{mock_provider, MockServer, MockTransportFactory};
    use serde_json::json;
    use std::time::Duration;

    async fn executor(server: Arc<MockServer>, configure: impl FnOnce(&mut McpConfig)) -> McpToolExecutor {
        let mut config = McpConfig {
            version: 1,
            servers: vec![mock_provider("fs")],
        };
        configure(&mut config);
        let factory = MockTransportFactory::new().with_server("fs", server);
        let registry = Arc::new(
            ConnectionRegistry::new(Arc::new(config)).with_transport_factory(Arc::new(factory)),
        );
        registry.connect("s1", "fs").await.unwrap();
        McpToolExecutor::new(registry)
    }

    #[tokio::test]
    async fn routes_namespaced_calls_to_the_provider() {
        let server = MockServer::new("fs").with_tool("read_file", "Read");
        let executor = executor(server.clone(), |_| {}).await;

        let schemas = executor.list_tools("s1").await;
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].function.name, "2_fs_read_file");

        let call = ToolCall::new("c1", "2_fs_read_file", json!({"path": "a.txt"}));
        let payload = executor.execute("s1", &call).await.unwrap();

        assert_eq!(payload, json!(r#"read_file({"path":"a.txt"})"#));
        assert_eq!(
            server.calls(),
            vec![("read_file".to_string(), json!({"path": "a.txt"}))]
        );
        assert_eq!(executor.lane(&call), "fs");
    }

    #[tokio::test]
    async fn unconnected_session_is_reported_not_connected() {
        let executor = executor(MockServer::new("fs").with_tool("read_file", "Read"), |_| {}).await;

        let call = ToolCall::new("c1", "2_fs_read_file", json!({}));
        assert_eq!(
            executor.execute("other", &call).await,
            Err(ToolError::NotConnected("fs".to_string()))
        );
    }

    #[tokio::test]
    async fn malformed_names_and_arguments_are_rejected() {
        let server = MockServer::new("fs").with_tool("read_file", "Read");
        let executor = executor(server.clone(), |_| {}).await;

        let malformed = ToolCall::new("c1", "read_file", json!({}));
        assert!(matches!(
            executor.execute("s1", &malformed).await,
            Err(ToolError::NotFound(_))
        ));

        let bad_args = ToolCall::new("c2", "2_fs_read_file", json!("{not json"));
        assert!(matches!(
            executor.execute("s1", &bad_args).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_error_results_become_execution_errors() {
        let server = MockServer::new("fs")
            .with_tool("rm", "Remove")
            .with_failing_tool("rm");
        let executor = executor(server, |_| {}).await;

        let call = ToolCall::new("c1", "2_fs_rm", json!({}));
        assert_eq!(
            executor.execute("s1", &call).await,
            Err(ToolError::Execution("rm failed".to_string()))
        );
    }

    #[tokio::test]
    async fn denied_tools_cannot_be_called() {
        let server = MockServer::new("fs").with_tool("rm", "Remove");
        let executor = executor(server.clone(), |config| {
            config.servers[0].denied_tools = vec!["rm".to_string()];
        })
        .await;

        let call = ToolCall::new("c1", "2_fs_rm", json!({}));
        assert!(matches!(
            executor.execute("s1", &call).await,
            Err(ToolError::NotFound(_))
        ));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let server = MockServer::new("fs")
            .with_tool("slow", "Slow")
            .with_call_delay(Duration::from_millis(300));
        let executor = executor(server.clone(), |config| {
            config.servers[0].request_timeout_ms = 30;
        })
        .await;

        let call = ToolCall::new("c1", "2_fs_slow", json!({}));
        assert!(matches!(
            executor.execute("s1", &call).await,
            Err(ToolError::Timeout(_))
        ));
    }
}
