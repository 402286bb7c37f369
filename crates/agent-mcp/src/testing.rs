//! In-memory MCP server and transport for tests.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature, for
//! downstream crates that need a provider without spawning processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::McpServerConfig;
use crate::error::{McpError, Result};
use crate::protocol::models::{JsonRpcNotification, JsonRpcResponse, METHOD_NOT_FOUND};
use crate::protocol::McpTransport;
use crate::transports::TransportFactory;

/// Scripted MCP server. Tool calls echo `name(arguments)` unless told to fail.
pub struct MockServer {
    name: String,
    tools: Mutex<Vec<Value>>,
    failing_tools: Mutex<HashSet<String>>,
    call_delay: Mutex<Duration>,
    handshake_delay: Mutex<Duration>,
    list_fails: AtomicBool,
    received: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<Value>>,
    calls: Mutex<Vec<(String, Value)>>,
    links: Mutex<Vec<(Arc<AtomicBool>, mpsc::UnboundedSender<String>)>>,
    open_transports: AtomicUsize,
    active_calls: AtomicUsize,
    max_active_calls: AtomicUsize,
}

impl MockServer {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tools: Mutex::new(Vec::new()),
            failing_tools: Mutex::new(HashSet::new()),
            call_delay: Mutex::new(Duration::ZERO),
            handshake_delay: Mutex::new(Duration::ZERO),
            list_fails: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            open_transports: AtomicUsize::new(0),
            active_calls: AtomicUsize::new(0),
            max_active_calls: AtomicUsize::new(0),
        })
    }

    pub fn with_tool(self: Arc<Self>, name: &str, description: &str) -> Arc<Self> {
        self.tools.lock().push(json!({
            "name": name,
            "description": description,
            "inputSchema": {"type": "object"}
        }));
        self
    }

    /// Calls to `name` answer with `isError: true`.
    pub fn with_failing_tool(self: Arc<Self>, name: &str) -> Arc<Self> {
        self.failing_tools.lock().insert(name.to_string());
        self
    }

    pub fn with_call_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.call_delay.lock() = delay;
        self
    }

    pub fn with_handshake_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.handshake_delay.lock() = delay;
        self
    }

    pub fn fail_listing(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    /// Every method received, notifications included, in arrival order.
    pub fn received_methods(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn cancelled_requests(&self) -> Vec<Value> {
        self.cancelled.lock().clone()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Transports currently connected and not yet dropped.
    pub fn open_transports(&self) -> usize {
        self.open_transports.load(Ordering::SeqCst)
    }

    /// Highest number of tool calls observed running at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active_calls.load(Ordering::SeqCst)
    }

    /// Simulate the provider process dying: every open transport fails.
    pub fn crash(&self) {
        for (closed, _) in self.links.lock().drain(..) {
            closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn push_notification(&self, method: &str) {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, None))
            .unwrap_or_default();
        for (_, outbound) in self.links.lock().iter() {
            let _ = outbound.send(frame.clone());
        }
    }

    fn link(&self, closed: Arc<AtomicBool>, outbound: mpsc::UnboundedSender<String>) {
        self.links.lock().push((closed, outbound));
    }

    fn handle(self: &Arc<Self>, raw: &str, outbound: mpsc::UnboundedSender<String>) {
        let Ok(frame) = serde_json::from_str::<Value>(raw) else {
            return;
        };
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        if !method.is_empty() {
            self.received.lock().push(method.clone());
        }

        let Some(id) = frame.get("id").cloned() else {
            if method == "notifications/cancelled" {
                self.cancelled.lock().push(params["requestId"].clone());
            }
            return;
        };
        if method.is_empty() {
            // A response to one of our own requests; nothing to do.
            return;
        }

        let server = self.clone();
        tokio::spawn(async move {
            let reply = server.reply(&method, &params, id).await;
            if let Ok(frame) = serde_json::to_string(&reply) {
                let _ = outbound.send(frame);
            }
        });
    }

    async fn reply(&self, method: &str, params: &Value, id: Value) -> JsonRpcResponse {
        match method {
            "initialize" => {
                let delay = *self.handshake_delay.lock();
                tokio::time::sleep(delay).await;
                JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {"listChanged": true}},
                        "serverInfo": {"name": self.name, "version": "0.0.0"}
                    }),
                )
            }
            "tools/list" => {
                if self.list_fails.load(Ordering::SeqCst) {
                    return JsonRpcResponse::failure(id, -32603, "listing failed");
                }
                let tools = self.tools.lock().clone();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let arguments = params["arguments"].clone();
                self.calls.lock().push((name.clone(), arguments.clone()));

                let active = self.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active_calls.fetch_max(active, Ordering::SeqCst);
                let delay = *self.call_delay.lock();
                tokio::time::sleep(delay).await;
                self.active_calls.fetch_sub(1, Ordering::SeqCst);

                let known = self.tools.lock().iter().any(|t| t["name"] == name.as_str());
                if !known {
                    return JsonRpcResponse::failure(id, -32602, format!("Unknown tool: {}", name));
                }
                let is_error = self.failing_tools.lock().contains(&name);
                let text = if is_error {
                    format!("{} failed", name)
                } else {
                    format!("{}({})", name, arguments)
                };
                JsonRpcResponse::success(
                    id,
                    json!({ "content": [{"type": "text", "text": text}], "isError": is_error }),
                )
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => {
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Unknown method: {}", other))
            }
        }
    }
}

/// Transport wired directly to a [`MockServer`].
pub struct MockTransport {
    server: Arc<MockServer>,
    connected: bool,
    closed: Arc<AtomicBool>,
    fail_connect: bool,
    connect_delay: Duration,
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MockTransport {
    pub fn new(server: Arc<MockServer>) -> Self {
        let (outbound, inbound) = mpsc::unbounded_channel();
        Self {
            server,
            connected: false,
            closed: Arc::new(AtomicBool::new(false)),
            fail_connect: false,
            connect_delay: Duration::ZERO,
            outbound,
            inbound: tokio::sync::Mutex::new(inbound),
        }
    }

    pub fn failing(mut self, fail: bool) -> Self {
        self.fail_connect = fail;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

#[async_trait]
impl McpTransport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        tokio::time::sleep(self.connect_delay).await;
        if self.fail_connect {
            return Err(McpError::Transport("mock spawn failure".to_string()));
        }
        self.connected = true;
        self.server.open_transports.fetch_add(1, Ordering::SeqCst);
        self.server.link(self.closed.clone(), self.outbound.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            self.server.open_transports.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }
        self.server.handle(&message, self.outbound.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(Duration::from_millis(25), inbound.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(McpError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.connected {
            self.server.open_transports.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Factory handing out [`MockTransport`]s by provider id, counting every creation.
pub struct MockTransportFactory {
    servers: HashMap<String, Arc<MockServer>>,
    created: AtomicUsize,
    failures_remaining: AtomicU32,
    connect_delay: Duration,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            created: AtomicUsize::new(0),
            failures_remaining: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
        }
    }

    pub fn with_server(mut self, provider_id: &str, server: Arc<MockServer>) -> Self {
        self.servers.insert(provider_id.to_string(), server);
        self
    }

    /// The next `count` transports fail to connect.
    pub fn with_failures(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, provider: &McpServerConfig) -> Result<Box<dyn McpTransport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let server = self.servers.get(&provider.id).cloned().ok_or_else(|| {
            McpError::Transport(format!("no mock server for {}", provider.id))
        })?;
        let fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(
            MockTransport::new(server)
                .failing(fail)
                .with_connect_delay(self.connect_delay),
        ))
    }
}

/// Provider config suitable for mock transports: short timeouts, fast retries.
pub fn mock_provider(id: &str) -> McpServerConfig {
    let mut config = McpServerConfig::stdio(id, "mock", Vec::new());
    config.request_timeout_ms = 1_000;
    config.reconnect.initial_backoff_ms = 5;
    config.reconnect.max_backoff_ms = 20;
    if let crate::config::TransportConfig::Stdio(stdio) = &mut config.transport {
        stdio.startup_timeout_ms = 1_000;
    }
    config
}
