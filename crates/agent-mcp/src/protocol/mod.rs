pub mod client;
pub mod models;

pub use client::{McpProtocolClient, McpTransport};
pub use models::{Implementation, McpInitializeResult, McpToolInfo, ServerCapabilities};
