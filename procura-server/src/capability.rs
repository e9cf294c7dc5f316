use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub traces: bool,
}

#[derive(Clone, Copy, Debug)]
struct CachedCapabilities {
    capabilities: EndpointCapabilities,
    checked_at: Instant,
}

/// Probe results per endpoint, trusted for `ttl` after the last check.
#[derive(Clone, Debug)]
pub struct CapabilityCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CachedCapabilities>>>,
}

impl CapabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fresh entry for `endpoint`, if any.
    pub async fn get(&self, endpoint: &str) -> Option<EndpointCapabilities> {
        let entries = self.entries.read().await;
        entries
            .get(endpoint)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.capabilities)
    }

    pub async fn insert(&self, endpoint: &str, capabilities: EndpointCapabilities) {
        self.entries.write().await.insert(
            endpoint.to_string(),
            CachedCapabilities {
                capabilities,
                checked_at: Instant::now(),
            },
        );
    }

    /// Marks `endpoint` as non-streaming and restarts its TTL, so later turns
    /// go straight to buffered calls until the entry expires.
    pub async fn demote_streaming(&self, endpoint: &str) {
        let mut entries = self.entries.write().await;
        let traces = entries
            .get(endpoint)
            .map(|entry| entry.capabilities.traces)
            .unwrap_or(false);
        tracing::warn!(endpoint, "demoting endpoint to non-streaming");
        entries.insert(
            endpoint.to_string(),
            CachedCapabilities {
                capabilities: EndpointCapabilities {
                    streaming: false,
                    traces,
                },
                checked_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, endpoint: &str) {
        self.entries.write().await.remove(endpoint);
    }
}
