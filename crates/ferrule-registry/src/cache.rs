//! Consumer-side discovery cache

use ferrule_core::ServiceMetaInfo;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Discovered instances indexed by service key
#[derive(Default)]
pub struct RegistryCache {
    services: RwLock<HashMap<String, Vec<ServiceMetaInfo>>>,
}

impl RegistryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instances for a service key; an empty list counts as a miss
    pub async fn get(&self, service_key: &str) -> Option<Vec<ServiceMetaInfo>> {
        let services = self.services.read().await;
        services
            .get(service_key)
            .filter(|instances| !instances.is_empty())
            .cloned()
    }

    /// Replace the instances cached for a service key
    pub async fn put(&self, service_key: &str, instances: Vec<ServiceMetaInfo>) {
        let mut services = self.services.write().await;
        debug!(
            service_key = service_key,
            count = instances.len(),
            "Cached service instances"
        );
        services.insert(service_key.to_string(), instances);
    }

    /// Drop every cached entry
    pub async fn clear(&self) {
        let mut services = self.services.write().await;
        if !services.is_empty() {
            debug!(entries = services.len(), "Cleared discovery cache");
        }
        services.clear();
    }

    /// Number of cached service keys
    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
