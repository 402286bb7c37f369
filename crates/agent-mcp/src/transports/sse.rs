use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{header::HeaderMap, Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{HeaderConfig, SseConfig};
use crate::error::{McpError, Result};
use crate::protocol::McpTransport;

const RECEIVE_POLL: Duration = Duration::from_millis(100);
const POST_TIMEOUT: Duration = Duration::from_secs(60);

/// MCP over server-sent events: responses arrive on the event stream, requests
/// are POSTed to the endpoint the server announces.
pub struct SseTransport {
    config: SseConfig,
    client: Client,
    connected: Arc<AtomicBool>,
    message_tx: mpsc::Sender<String>,
    message_rx: Mutex<mpsc::Receiver<String>>,
    sse_handle: Option<tokio::task::JoinHandle<()>>,
    endpoint_url: Arc<RwLock<Option<String>>>,
}

impl SseTransport {
    pub fn new(config: SseConfig) -> Self {
        let (message_tx, message_rx) = mpsc::channel(100);
        Self {
            config,
            client: Client::new(),
            connected: Arc::new(AtomicBool::new(false)),
            message_tx,
            message_rx: Mutex::new(message_rx),
            sse_handle: None,
            endpoint_url: Arc::new(RwLock::new(None)),
        }
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for HeaderConfig { name, value } in &self.config.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::InvalidConfig(format!("Invalid header name: {}", e)))?;
            let header_value = value
                .parse()
                .map_err(|e| McpError::InvalidConfig(format!("Invalid header value: {}", e)))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    /// Fallback POST target when the server never announced an endpoint.
    fn default_post_url(&self) -> String {
        format!("{}/message", self.config.url.trim_end_matches("/sse"))
    }
}

/// Resolve an announced endpoint (often relative) against the stream URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(endpoint.trim()).ok().map(|url| url.to_string())
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to MCP SSE endpoint: {}", self.config.url);

        let headers = self.build_headers()?;
        let response = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            self.client
                .get(&self.config.url)
                .headers(headers)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| {
            McpError::Timeout(format!(
                "SSE connect timed out after {}ms",
                self.config.connect_timeout_ms
            ))
        })??;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let message_tx = self.message_tx.clone();
        let connected = self.connected.clone();
        let endpoint_url = self.endpoint_url.clone();
        let url = self.config.url.clone();

        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream().eventsource();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) if event.event == "endpoint" => match resolve_endpoint(&url, &event.data) {
                        Some(endpoint) => {
                            debug!("Got endpoint: {}", endpoint);
                            *endpoint_url.write().await = Some(endpoint);
                        }
                        None => warn!("Ignoring unusable endpoint: {}", event.data),
                    },
                    Ok(event) if event.event == "message" || event.event.is_empty() => {
                        if message_tx.send(event.data).await.is_err() {
                            break;
                        }
                    }
                    Ok(event) => debug!("Ignoring SSE event: {}", event.event),
                    Err(e) => {
                        warn!("SSE stream error: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            warn!("SSE stream ended for {}", url);
        });

        self.sse_handle = Some(handle);
        self.connected.store(true, Ordering::SeqCst);

        info!("MCP SSE transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting MCP SSE transport");

        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sse_handle.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        let post_url = self
            .endpoint_url
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.default_post_url());

        let response = self
            .client
            .post(&post_url)
            .headers(self.build_headers()?)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message)
            .timeout(POST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!(
                "POST failed: {} - {}",
                status, body
            )));
        }

        debug!("Sent message via POST to {}", post_url);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut rx = self.message_rx.lock().await;
        // Deliver what was buffered before the stream ended.
        if let Ok(message) = rx.try_recv() {
            return Ok(Some(message));
        }
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }

        match tokio::time::timeout(RECEIVE_POLL, rx.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                warn!("SSE message channel closed");
                Err(McpError::Disconnected)
            }
            Err(_) => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.sse_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> SseConfig {
        SseConfig {
            url,
            headers: vec![HeaderConfig {
                name: "x-api-key".to_string(),
                value: "secret".to_string(),
            }],
            connect_timeout_ms: 2_000,
        }
    }

    #[test]
    fn resolves_relative_endpoints() {
        assert_eq!(
            resolve_endpoint("http://host:9000/sse", "/messages?session=1").as_deref(),
            Some("http://host:9000/messages?session=1")
        );
        assert_eq!(
            resolve_endpoint("http://host:9000/sse", "http://other/rpc").as_deref(),
            Some("http://other/rpc")
        );
        assert!(resolve_endpoint("not a url", "/x").is_none());
    }

    #[test]
    fn rejects_bad_header_names() {
        let mut config = config("http://localhost/sse".to_string());
        config.headers[0].name = "bad header".to_string();
        assert!(matches!(
            SseTransport::new(config).build_headers(),
            Err(McpError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn reads_events_and_posts_to_announced_endpoint() {
        let server = MockServer::start().await;
        let body = "event: endpoint\ndata: /rpc\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mut transport = SseTransport::new(config(format!("{}/sse", server.uri())));
        transport.connect().await.unwrap();

        let mut received = None;
        for _ in 0..20 {
            match transport.receive().await {
                Ok(Some(message)) => {
                    received = Some(message);
                    break;
                }
                Ok(None) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(
            received.as_deref(),
            Some(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
        );

        // The canned stream has ended by now; the endpoint it announced is still used.
        transport.connected.store(true, Ordering::SeqCst);
        transport.send("{}".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn http_error_fails_connect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut transport = SseTransport::new(config(format!("{}/sse", server.uri())));
        assert!(matches!(
            transport.connect().await,
            Err(McpError::Transport(_))
        ));
        assert!(!transport.is_connected());
    }
}
