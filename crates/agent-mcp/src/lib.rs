//! MCP client side of the orchestration core.
//!
//! Providers are launched per session through the [`ConnectionRegistry`], their
//! tools are merged into one namespaced catalog by [`discovery`], and calls are
//! routed back by [`McpToolExecutor`].

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod namespace;
pub mod protocol;
pub mod registry;
pub mod transports;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::*;
pub use connection::Connection;
pub use discovery::catalog;
pub use error::{ConnectionError, MalformedToolNameError, McpError, Result};
pub use executor::McpToolExecutor;
pub use protocol::*;
pub use registry::ConnectionRegistry;
pub use transports::*;
pub use types::*;
