use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, warn};

use crate::error::{McpError, Result};
use crate::protocol::models::*;
use crate::types::McpCallResult;

/// Upper bound on `tools/list` pages followed for one listing.
const MAX_TOOL_PAGES: usize = 64;

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn send(&self, message: String) -> Result<()>;
    /// Next inbound frame, or `None` if nothing arrived within the transport's poll window.
    async fn receive(&self) -> Result<Option<String>>;
    fn is_connected(&self) -> bool;
}

type SharedTransport = Arc<RwLock<Box<dyn McpTransport>>>;
type PendingRequests = DashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// Tracks one outstanding request. Dropping it before completion forgets the
/// request and, if it reached the server, tells the server to stop working on it.
struct InFlight {
    id: u64,
    pending: Arc<PendingRequests>,
    transport: SharedTransport,
    sent: bool,
    finished: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.pending.remove(&self.id);
        if !self.sent {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = self.transport.clone();
        let notification = JsonRpcNotification::new(
            "notifications/cancelled",
            Some(json!({ "requestId": self.id, "reason": "request abandoned by client" })),
        );
        runtime.spawn(async move {
            let Ok(message) = serde_json::to_string(&notification) else {
                return;
            };
            let transport = transport.read().await;
            if transport.is_connected() {
                if let Err(e) = transport.send(message).await {
                    debug!("Failed to send cancellation: {}", e);
                }
            }
        });
    }
}

/// MCP protocol client
pub struct McpProtocolClient {
    transport: SharedTransport,
    next_id: AtomicU64,
    pending: Arc<PendingRequests>,
    alive: Arc<AtomicBool>,
    message_handler: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    notification_tx: mpsc::Sender<JsonRpcNotification>,
    notification_rx: tokio::sync::Mutex<mpsc::Receiver<JsonRpcNotification>>,
}

impl McpProtocolClient {
    pub fn new(transport: Box<dyn McpTransport>) -> Self {
        let (notification_tx, notification_rx) = mpsc::channel(100);
        Self {
            transport: Arc::new(RwLock::new(transport)),
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            alive: Arc::new(AtomicBool::new(false)),
            message_handler: parking_lot::Mutex::new(None),
            notification_tx,
            notification_rx: tokio::sync::Mutex::new(notification_rx),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.write().await.connect().await?;
        self.alive.store(true, Ordering::SeqCst);
        self.start_message_handler();
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handler) = self.message_handler.lock().take() {
            handler.abort();
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.clear();

        self.transport.write().await.disconnect().await
    }

    /// False once the transport has failed or the client was disconnected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn start_message_handler(&self) {
        let transport = self.transport.clone();
        let pending = self.pending.clone();
        let alive = self.alive.clone();
        let notification_tx = self.notification_tx.clone();

        let handler = tokio::spawn(async move {
            loop {
                // Transports keep yielding buffered frames until they report the disconnect.
                let received = transport.read().await.receive().await;

                match received {
                    Ok(Some(message)) => {
                        debug!("Received message: {}", message);
                        Self::handle_message(&message, &transport, &pending, &notification_tx)
                            .await;
                    }
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        error!("Transport error: {}", e);
                        break;
                    }
                }
            }

            alive.store(false, Ordering::SeqCst);
            // Waiters observe a closed channel and report the server as disconnected.
            pending.clear();
        });

        if let Some(previous) = self.message_handler.lock().replace(handler) {
            previous.abort();
        }
    }

    async fn handle_message(
        message: &str,
        transport: &SharedTransport,
        pending: &PendingRequests,
        notification_tx: &mpsc::Sender<JsonRpcNotification>,
    ) {
        let incoming = match IncomingMessage::parse(message) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Failed to handle message: {}", e);
                return;
            }
        };

        match incoming {
            IncomingMessage::Response(response) => {
                let waiter = response.id.as_u64().and_then(|id| pending.remove(&id));
                match waiter {
                    Some((_, sender)) => {
                        let _ = sender.send(response);
                    }
                    None => debug!("Dropping response for unknown request {}", response.id),
                }
            }
            IncomingMessage::Notification(notification) => {
                if notification_tx.try_send(notification).is_err() {
                    debug!("Notification buffer full, dropping notification");
                }
            }
            IncomingMessage::Request { id, method } => {
                let reply = if method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Unsupported method: {}", method))
                };
                match serde_json::to_string(&reply) {
                    Ok(reply) => {
                        if let Err(e) = transport.read().await.send(reply).await {
                            warn!("Failed to answer server request '{}': {}", method, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode reply: {}", e),
                }
            }
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(McpError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request_json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let mut in_flight = InFlight {
            id,
            pending: self.pending.clone(),
            transport: self.transport.clone(),
            sent: false,
            finished: false,
        };

        self.transport.read().await.send(request_json).await?;
        in_flight.sent = true;

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                in_flight.finished = true;
                return Err(McpError::Disconnected);
            }
            Err(_) => {
                return Err(McpError::Timeout(format!(
                    "{} (request {}) timed out after {}ms",
                    method, id, timeout_ms
                )));
            }
        };
        in_flight.finished = true;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::Protocol("Missing result".to_string()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let transport = self.transport.read().await;
        transport.send(serde_json::to_string(&notification)?).await
    }

    /// Run the `initialize` handshake and acknowledge it with `notifications/initialized`.
    pub async fn initialize(&self, timeout_ms: u64) -> Result<McpInitializeResult> {
        let params = serde_json::to_value(McpInitializeRequest::default())?;
        let result = self.send_request("initialize", Some(params), timeout_ms).await?;
        let result: McpInitializeResult = serde_json::from_value(result)?;

        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                "Server negotiated protocol version {} (requested {})",
                result.protocol_version, PROTOCOL_VERSION
            );
        }

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self, timeout_ms: u64) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.send_request("tools/list", params, timeout_ms).await?;
            let page: McpToolListResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!("tools/list exceeded {} pages, truncating", MAX_TOOL_PAGES);
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout_ms: u64,
    ) -> Result<McpCallResult> {
        let request = McpToolCallRequest {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let params = serde_json::to_value(request)?;
        let result = self.send_request("tools/call", Some(params), timeout_ms).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn ping(&self, timeout_ms: u64) -> Result<()> {
        self.send_request("ping", None, timeout_ms).await?;
        Ok(())
    }

    pub async fn try_receive_notification(&self) -> Option<JsonRpcNotification> {
        let mut rx = self.notification_rx.lock().await;
        rx.try_recv().ok()
    }
}

impl Drop for McpProtocolClient {
    fn drop(&mut self) {
        if let Some(handler) = self.message_handler.get_mut().take() {
            handler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockServer, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    async fn connected(server: Arc<MockServer>) -> McpProtocolClient {
        let client = McpProtocolClient::new(Box::new(MockTransport::new(server)));
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn handshake_and_list() {
        let server = MockServer::new("fs").with_tool("read_file", "Read a file");
        let client = connected(server.clone()).await;

        let init = client.initialize(1_000).await.unwrap();
        assert_eq!(init.server_info.name, "fs");

        let tools = client.list_tools(1_000).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].input_schema, Some(json!({"type": "object"})));

        let methods = server.received_methods();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[tokio::test]
    async fn call_tool_returns_content() {
        let server = MockServer::new("calc").with_tool("add", "Add numbers");
        let client = connected(server).await;

        let result = client
            .call_tool("add", json!({"a": 2, "b": 3}), 1_000)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.to_text(), r#"add({"a":2,"b":3})"#);
    }

    #[tokio::test]
    async fn rpc_errors_are_reported() {
        let server = MockServer::new("calc");
        let client = connected(server).await;

        let err = client.send_request("resources/list", None, 1_000).await;
        assert!(matches!(err, Err(McpError::Rpc { code: METHOD_NOT_FOUND, .. })));
    }

    #[tokio::test]
    async fn timeout_sends_cancellation() {
        let server = MockServer::new("slow")
            .with_tool("wait", "Waits")
            .with_call_delay(Duration::from_millis(500));
        let client = connected(server.clone()).await;

        let err = client.call_tool("wait", json!({}), 50).await;
        assert!(matches!(err, Err(McpError::Timeout(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.cancelled_requests().len(), 1);
    }

    #[tokio::test]
    async fn dropped_request_sends_cancellation() {
        let server = MockServer::new("slow")
            .with_tool("wait", "Waits")
            .with_call_delay(Duration::from_millis(500));
        let client = connected(server.clone()).await;

        let call = client.call_tool("wait", json!({}), 5_000);
        let raced = tokio::time::timeout(Duration::from_millis(50), call).await;
        assert!(raced.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.cancelled_requests().len(), 1);
        assert!(client.pending.is_empty());
    }

    #[tokio::test]
    async fn server_exit_fails_pending_requests() {
        let server = MockServer::new("flaky")
            .with_tool("wait", "Waits")
            .with_call_delay(Duration::from_millis(500));
        let client = connected(server.clone()).await;

        let kill = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            server.crash();
        };
        let (result, _) = tokio::join!(client.call_tool("wait", json!({}), 5_000), kill);

        assert_eq!(result, Err(McpError::Disconnected));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!client.is_alive());
        assert_eq!(client.ping(100).await, Err(McpError::Disconnected));
    }

    #[tokio::test]
    async fn forwards_notifications() {
        let server = MockServer::new("fs");
        let client = connected(server.clone()).await;

        server.push_notification("notifications/tools/list_changed");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let notification = client.try_receive_notification().await.unwrap();
        assert_eq!(notification.method, "notifications/tools/list_changed");
    }
}
