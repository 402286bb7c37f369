//! Per-session provider connections.
//!
//! Live connections are keyed by `(session, provider)`. Connecting and
//! disconnecting the same key is serialized through a per-key async slot so
//! concurrent callers share one process; different keys never wait on each other.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{McpServerConfig, ProviderCatalog};
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::transports::{DefaultTransportFactory, TransportFactory};
use crate::types::{ConnectionKey, RegistryEvent};

pub type ConnectResult = std::result::Result<Arc<Connection>, ConnectionError>;

/// Holds the per-key slot for one operation and drops the slot entry once unused.
struct SlotLease<'a> {
    slots: &'a DashMap<ConnectionKey, Arc<Mutex<()>>>,
    key: ConnectionKey,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        // Two references left means the map's and ours: nobody else is waiting.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 2);
    }
}

pub struct ConnectionRegistry {
    catalog: Arc<dyn ProviderCatalog>,
    factory: Arc<dyn TransportFactory>,
    live: DashMap<ConnectionKey, Arc<Connection>>,
    slots: DashMap<ConnectionKey, Arc<Mutex<()>>>,
    event_tx: Option<mpsc::Sender<RegistryEvent>>,
}

impl ConnectionRegistry {
    pub fn new(catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self {
            catalog,
            factory: Arc::new(DefaultTransportFactory),
            live: DashMap::new(),
            slots: DashMap::new(),
            event_tx: None,
        }
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<RegistryEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn provider_config(&self, provider_id: &str) -> Option<McpServerConfig> {
        self.catalog.resolve(provider_id)
    }

    /// Return the live connection for the key, establishing it if needed.
    pub async fn connect(&self, session_id: &str, provider_id: &str) -> ConnectResult {
        let key = ConnectionKey::new(session_id, provider_id);
        if let Some(connection) = self.live_connection(&key) {
            return Ok(connection);
        }

        let lease = self.lease(&key);
        let _guard = lease.slot.lock().await;

        // Another caller may have finished connecting while we waited.
        if let Some(connection) = self.live_connection(&key) {
            return Ok(connection);
        }

        match self.establish_with_retry(&key).await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                self.live.insert(key.clone(), connection.clone());
                info!("Connected {}", key);
                self.emit(RegistryEvent::Connected {
                    key,
                    server_name: connection.server_info().name.clone(),
                });
                Ok(connection)
            }
            Err(e) => {
                warn!("Failed to connect {}: {}", key, e);
                self.emit(RegistryEvent::ConnectFailed {
                    key,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// The live connection for the key, if any. Dead connections are evicted.
    pub fn get(&self, session_id: &str, provider_id: &str) -> Option<Arc<Connection>> {
        self.live_connection(&ConnectionKey::new(session_id, provider_id))
    }

    /// Close and forget the connection for the key. Absent keys are a no-op.
    pub async fn disconnect(&self, session_id: &str, provider_id: &str) {
        let key = ConnectionKey::new(session_id, provider_id);
        self.disconnect_key(&key).await;
    }

    /// Close every connection of the session. Returns how many were closed.
    pub async fn disconnect_all(&self, session_id: &str) -> usize {
        let keys: Vec<ConnectionKey> = self
            .live
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for key in keys {
            if self.disconnect_key(&key).await {
                closed += 1;
            }
        }
        closed
    }

    /// Live connections of the session, ordered by provider id.
    pub fn connections(&self, session_id: &str) -> Vec<Arc<Connection>> {
        let mut keys: Vec<ConnectionKey> = self
            .live
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();

        keys.iter()
            .filter_map(|key| self.live_connection(key))
            .collect()
    }

    /// Sessions holding at least one connection, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self
            .live
            .iter()
            .map(|entry| entry.key().session_id.clone())
            .collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }

    pub async fn shutdown_all(&self) {
        let keys: Vec<ConnectionKey> = self.live.iter().map(|e| e.key().clone()).collect();
        info!("Shutting down {} MCP connection(s)", keys.len());
        for key in keys {
            self.disconnect_key(&key).await;
        }
    }

    async fn disconnect_key(&self, key: &ConnectionKey) -> bool {
        let lease = self.lease(key);
        let _guard = lease.slot.lock().await;

        let Some((_, connection)) = self.live.remove(key) else {
            debug!("Disconnect of {} ignored, not connected", key);
            return false;
        };

        connection.close().await;
        info!("Disconnected {}", key);
        self.emit(RegistryEvent::Disconnected { key: key.clone() });
        true
    }

    fn lease(&self, key: &ConnectionKey) -> SlotLease<'_> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SlotLease {
            slots: &self.slots,
            key: key.clone(),
            slot,
        }
    }

    fn live_connection(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let connection = self.live.get(key).map(|entry| entry.value().clone())?;
        if connection.is_alive() {
            return Some(connection);
        }

        let evicted = self
            .live
            .remove_if(key, |_, current| Arc::ptr_eq(current, &connection))
            .is_some();
        if evicted {
            warn!("Evicted dead connection {}", key);
            self.emit(RegistryEvent::Disconnected { key: key.clone() });
        }
        None
    }

    async fn establish_with_retry(
        &self,
        key: &ConnectionKey,
    ) -> std::result::Result<Connection, ConnectionError> {
        let config = self
            .catalog
            .resolve(&key.provider_id)
            .ok_or_else(|| ConnectionError::UnknownProvider(key.provider_id.clone()))?;
        config.check_launchable()?;

        let attempts = config.reconnect.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.establish_once(key, &config).await {
                Ok(connection) => return Ok(connection),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= attempts => {
                    if attempts == 1 {
                        return Err(e);
                    }
                    return Err(ConnectionError::Exhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let backoff = config.reconnect.backoff_ms(attempt);
                    warn!(
                        "Connect attempt {}/{} for {} failed: {}; retrying in {}ms",
                        attempt, attempts, key, e, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn establish_once(
        &self,
        key: &ConnectionKey,
        config: &McpServerConfig,
    ) -> std::result::Result<Connection, ConnectionError> {
        let transport = self
            .factory
            .create(config)
            .map_err(|e| ConnectionError::from_mcp(key, e))?;

        let timeout_ms = config.startup_timeout_ms();
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            Connection::establish(key.clone(), config, transport),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                key: key.clone(),
                timeout_ms,
            }),
        }
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                debug!("Registry event channel full or closed, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McpConfig;
    use crate::testing::{mock_provider, MockServer, MockTransportFactory};
    use std::time::Duration;

    fn catalog(ids: &[&str]) -> Arc<McpConfig> {
        Arc::new(McpConfig {
            version: 1,
            servers: ids.iter().map(|id| mock_provider(id)).collect(),
        })
    }

    fn registry(factory: Arc<MockTransportFactory>, ids: &[&str]) -> ConnectionRegistry {
        ConnectionRegistry::new(catalog(ids)).with_transport_factory(factory)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let server = MockServer::new("fs");
        let factory = Arc::new(MockTransportFactory::new().with_server("fs", server.clone()));
        let registry = registry(factory.clone(), &["fs"]);

        let first = registry.connect("s1", "fs").await.unwrap();
        let second = registry.connect("s1", "fs").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
        assert_eq!(server.open_transports(), 1);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_connection() {
        let server = MockServer::new("fs").with_handshake_delay(Duration::from_millis(30));
        let factory = Arc::new(
            MockTransportFactory::new()
                .with_server("fs", server.clone())
                .with_connect_delay(Duration::from_millis(10)),
        );
        let registry = Arc::new(registry(factory.clone(), &["fs"]));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.connect("s1", "fs").await })
            })
            .collect();
        let connections: Vec<Arc<Connection>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(factory.created(), 1);
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert!(registry.slots.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let server = MockServer::new("fs");
        let factory = Arc::new(MockTransportFactory::new().with_server("fs", server.clone()));
        let registry = registry(factory.clone(), &["fs"]);

        let a = registry.connect("s1", "fs").await.unwrap();
        let b = registry.connect("s2", "fs").await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created(), 2);
        assert_eq!(registry.sessions(), vec!["s1", "s2"]);

        registry.disconnect("s1", "fs").await;
        assert!(registry.get("s1", "fs").is_none());
        assert!(registry.get("s2", "fs").is_some());
    }

    #[tokio::test]
    async fn unknown_and_disabled_providers_are_refused() {
        let factory = Arc::new(MockTransportFactory::new());
        let mut config = McpConfig {
            version: 1,
            servers: vec![mock_provider("off")],
        };
        config.servers[0].enabled = false;
        let registry =
            ConnectionRegistry::new(Arc::new(config)).with_transport_factory(factory.clone());

        assert_eq!(
            registry.connect("s1", "nope").await.unwrap_err(),
            ConnectionError::UnknownProvider("nope".to_string())
        );
        assert_eq!(
            registry.connect("s1", "off").await.unwrap_err(),
            ConnectionError::Disabled("off".to_string())
        );
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let server = MockServer::new("fs");
        let factory = Arc::new(
            MockTransportFactory::new()
                .with_server("fs", server.clone())
                .with_failures(2),
        );
        let registry = registry(factory.clone(), &["fs"]);

        let connection = registry.connect("s1", "fs").await.unwrap();

        assert!(connection.is_alive());
        assert_eq!(factory.created(), 3);
        assert_eq!(server.open_transports(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_no_entry() {
        let (tx, mut rx) = mpsc::channel(8);
        let server = MockServer::new("fs");
        let factory = Arc::new(
            MockTransportFactory::new()
                .with_server("fs", server.clone())
                .with_failures(10),
        );
        let registry = registry(factory.clone(), &["fs"]).with_event_channel(tx);

        let err = registry.connect("s1", "fs").await.unwrap_err();

        assert!(matches!(err, ConnectionError::Exhausted { attempts: 3, .. }));
        assert_eq!(factory.created(), 3);
        assert!(registry.get("s1", "fs").is_none());
        assert!(registry.slots.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(RegistryEvent::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn startup_timeout_is_reported() {
        let server = MockServer::new("fs").with_handshake_delay(Duration::from_millis(500));
        let factory = Arc::new(MockTransportFactory::new().with_server("fs", server.clone()));
        let mut config = mock_provider("fs");
        config.reconnect.enabled = false;
        if let crate::config::TransportConfig::Stdio(stdio) = &mut config.transport {
            stdio.startup_timeout_ms = 30;
        }
        let registry = ConnectionRegistry::new(Arc::new(McpConfig {
            version: 1,
            servers: vec![config],
        }))
        .with_transport_factory(factory);

        let err = registry.connect("s1", "fs").await.unwrap_err();

        assert!(matches!(err, ConnectionError::Timeout { timeout_ms: 30, .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.open_transports(), 0);
    }

    #[tokio::test]
    async fn cancelled_connect_rolls_back() {
        let server = MockServer::new("fs").with_handshake_delay(Duration::from_millis(300));
        let factory = Arc::new(MockTransportFactory::new().with_server("fs", server.clone()));
        let registry = registry(factory.clone(), &["fs"]);

        let attempt =
            tokio::time::timeout(Duration::from_millis(30), registry.connect("s1", "fs")).await;
        assert!(attempt.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(registry.get("s1", "fs").is_none());
        assert!(registry.slots.is_empty());
        assert_eq!(server.open_transports(), 0);

        // The key is usable again right away.
        assert!(registry.connect("s1", "fs").await.is_ok());
        assert_eq!(server.open_transports(), 1);
    }

    #[tokio::test]
    async fn disconnect_absent_key_is_noop() {
        let (tx, mut rx) = mpsc::channel(8);
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory, &["fs"]).with_event_channel(tx);

        registry.disconnect("s1", "fs").await;
        assert_eq!(registry.disconnect_all("s1").await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_all_closes_only_that_session() {
        let fs = MockServer::new("fs");
        let git = MockServer::new("git");
        let factory = Arc::new(
            MockTransportFactory::new()
                .with_server("fs", fs.clone())
                .with_server("git", git.clone()),
        );
        let registry = registry(factory, &["fs", "git"]);

        registry.connect("s1", "git").await.unwrap();
        registry.connect("s1", "fs").await.unwrap();
        registry.connect("s2", "fs").await.unwrap();

        let providers: Vec<String> = registry
            .connections("s1")
            .iter()
            .map(|c| c.provider_id().to_string())
            .collect();
        assert_eq!(providers, vec!["fs", "git"]);

        assert_eq!(registry.disconnect_all("s1").await, 2);
        assert!(registry.connections("s1").is_empty());
        assert_eq!(registry.connections("s2").len(), 1);
        assert_eq!(git.open_transports(), 0);
        assert_eq!(fs.open_transports(), 1);

        registry.shutdown_all().await;
        assert!(registry.sessions().is_empty());
        assert_eq!(fs.open_transports(), 0);
    }

    #[tokio::test]
    async fn dead_connections_are_replaced() {
        let server = MockServer::new("fs");
        let factory = Arc::new(MockTransportFactory::new().with_server("fs", server.clone()));
        let registry = registry(factory.clone(), &["fs"]);

        let first = registry.connect("s1", "fs").await.unwrap();
        server.crash();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!first.is_alive());
        assert!(registry.get("s1", "fs").is_none());

        let second = registry.connect("s1", "fs").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn emits_lifecycle_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let factory =
            Arc::new(MockTransportFactory::new().with_server("fs", MockServer::new("fs-server")));
        let registry = registry(factory, &["fs"]).with_event_channel(tx);

        registry.connect("s1", "fs").await.unwrap();
        registry.disconnect("s1", "fs").await;

        let key = ConnectionKey::new("s1", "fs");
        assert_eq!(
            rx.recv().await,
            Some(RegistryEvent::Connected {
                key: key.clone(),
                server_name: "fs-server".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(RegistryEvent::Disconnected { key }));
    }
}
