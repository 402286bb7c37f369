pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::config::{McpServerConfig, TransportConfig};
use crate::error::Result;
use crate::protocol::McpTransport;

/// Builds an unconnected transport for a provider.
pub trait TransportFactory: Send + Sync {
    fn create(&self, provider: &McpServerConfig) -> Result<Box<dyn McpTransport>>;
}

/// Stdio child processes and SSE endpoints, as configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, provider: &McpServerConfig) -> Result<Box<dyn McpTransport>> {
        Ok(match &provider.transport {
            TransportConfig::Stdio(stdio) => Box::new(StdioTransport::new(stdio.clone())),
            TransportConfig::Sse(sse) => Box::new(SseTransport::new(sse.clone())),
        })
    }
}
