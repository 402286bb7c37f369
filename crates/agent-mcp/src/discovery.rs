//! Session tool catalog assembled from live provider connections.

use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::namespace;
use crate::registry::ConnectionRegistry;
use crate::types::NamespacedTool;

/// Every tool the session's live providers expose, under model-facing names.
///
/// Providers are listed concurrently and merged in provider id order. A provider
/// whose listing fails contributes nothing; it does not fail the catalog.
pub async fn catalog(registry: &ConnectionRegistry, session_id: &str) -> Vec<NamespacedTool> {
    let connections = registry.connections(session_id);
    let listings = join_all(connections.iter().map(|c| c.list_tools())).await;

    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    for (connection, listing) in connections.iter().zip(listings) {
        let descriptors = match listing {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!("Skipping tools of {}: listing failed: {}", connection.key(), e);
                continue;
            }
        };

        let config = registry.provider_config(connection.provider_id());
        for descriptor in descriptors {
            if let Some(config) = &config {
                if !config.is_tool_allowed(&descriptor.name) {
                    debug!(
                        "Tool {} of {} filtered by provider config",
                        descriptor.name,
                        connection.key()
                    );
                    continue;
                }
            }

            let name = match namespace::try_encode(&descriptor.provider_id, &descriptor.name) {
                Ok(name) => name,
                Err(e) => {
                    warn!("Skipping tool of {}: {}", connection.key(), e);
                    continue;
                }
            };
            if !namespace::is_function_name(&name) {
                warn!(
                    "Skipping tool {:?} of {}: {} is not a valid function name",
                    descriptor.name,
                    connection.key(),
                    name
                );
                continue;
            }
            if !seen.insert(name.clone()) {
                warn!("Duplicate tool name {} from {}, keeping the first", name, connection.key());
                continue;
            }
            tools.push(NamespacedTool { name, descriptor });
        }
    }

    debug!("Catalog for session {:?}: {} tool(s)", session_id, tools.len());
    tools
}
