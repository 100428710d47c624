//! Service registration, renewal and discovery

use dashmap::DashSet;
use ferrule_core::{RegistryConfig, RegistryKind, RpcError, RpcResult, ServiceMetaInfo};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::RegistryCache;
use crate::etcd::EtcdStore;
use crate::memory::MemoryStore;
use crate::store::{KvStore, WatchEventKind};

/// Namespace holding every registration
pub const REGISTRY_ROOT: &str = "/rpc/";

/// Lifetime of a registration lease
pub const LEASE_TTL_SECS: i64 = 30;

/// Period of the lease renewal task
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Registry of service instances backed by a key-value store
///
/// Providers call [`register`](Self::register) and keep their leases alive
/// with the heartbeat task. Consumers call [`discover`](Self::discover),
/// which caches results and watches each discovered key; a delete on any
/// watched key clears the whole cache.
pub struct ServiceRegistry {
    store: Arc<dyn KvStore>,
    cache: Arc<RegistryCache>,
    /// Keys registered by this process
    local_keys: DashSet<String>,
    /// Keys with an active watch
    watching: Arc<DashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceRegistry {
    /// Connect to the store selected by the configuration
    pub async fn connect(config: &RegistryConfig) -> RpcResult<Self> {
        let store: Arc<dyn KvStore> = match config.kind {
            RegistryKind::Etcd => Arc::new(EtcdStore::connect(config).await?),
            RegistryKind::Memory => MemoryStore::shared(),
        };
        Ok(Self::new(store))
    }

    /// Create a registry over an existing store
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        info!(store = store.name(), "Registry initialized");
        Self {
            store,
            cache: Arc::new(RegistryCache::new()),
            local_keys: DashSet::new(),
            watching: Arc::new(DashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register an instance under a fresh lease
    pub async fn register(&self, meta: &ServiceMetaInfo) -> RpcResult<()> {
        let key = registry_key(meta);
        let value = serde_json::to_string(meta)?;

        let lease_id = self.store.grant_lease(LEASE_TTL_SECS).await?;
        self.store.put(&key, &value, Some(lease_id)).await?;
        self.local_keys.insert(key.clone());

        info!(
            key = %key,
            address = %meta.service_address(),
            lease_id = lease_id,
            "Registered service"
        );
        Ok(())
    }

    /// Remove an instance
    pub async fn unregister(&self, meta: &ServiceMetaInfo) -> RpcResult<()> {
        let key = registry_key(meta);
        self.store.delete(&key).await?;
        self.local_keys.remove(&key);

        info!(key = %key, "Unregistered service");
        Ok(())
    }

    /// Instances serving a service key
    ///
    /// Served from the cache when it holds a non-empty list, otherwise read
    /// from the store. No instance at all is a discovery error.
    pub async fn discover(&self, service_key: &str) -> RpcResult<Vec<ServiceMetaInfo>> {
        if let Some(cached) = self.cache.get(service_key).await {
            return Ok(cached);
        }

        let prefix = format!("{}{}:", REGISTRY_ROOT, service_key);
        let entries = self.store.get_prefix(&prefix).await?;

        let mut instances = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_str::<ServiceMetaInfo>(&value) {
                Ok(meta) => {
                    if let Err(e) = self.watch(&key).await {
                        warn!(key = %key, error = %e, "Failed to watch key");
                    }
                    instances.push(meta);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable registration"),
            }
        }

        if instances.is_empty() {
            return Err(RpcError::Discovery(format!(
                "no provider found for {}",
                service_key
            )));
        }

        debug!(
            service_key = service_key,
            count = instances.len(),
            "Discovered service instances"
        );
        self.cache.put(service_key, instances.clone()).await;
        Ok(instances)
    }

    /// Renew the lease of every locally registered key
    ///
    /// A key whose lease already expired is dropped and not registered again.
    /// Returns the number of renewed keys.
    pub async fn heartbeat(&self) -> usize {
        let keys: Vec<String> = self.local_keys.iter().map(|k| k.clone()).collect();
        let mut renewed = 0;

        for key in keys {
            let value = match self.store.get(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    warn!(key = %key, "Lease expired, restart the provider to register again");
                    self.local_keys.remove(&key);
                    continue;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Heartbeat read failed");
                    continue;
                }
            };

            let renewal = match serde_json::from_str::<ServiceMetaInfo>(&value) {
                Ok(meta) => self.register(&meta).await,
                Err(e) => Err(e.into()),
            };
            match renewal {
                Ok(()) => renewed += 1,
                Err(e) => warn!(key = %key, error = %e, "Lease renewal failed"),
            }
        }

        debug!(renewed = renewed, "Heartbeat complete");
        renewed
    }

    /// Start renewing leases every [`HEARTBEAT_INTERVAL`] until cancelled
    pub fn start_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) {
        let registry = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.heartbeat().await;
                    }
                }
            }
            debug!("Heartbeat task stopped");
        });
        self.track(handle);
    }

    /// Watch a key and clear the cache when it is deleted
    ///
    /// A key is watched at most once.
    pub async fn watch(&self, key: &str) -> RpcResult<()> {
        if !self.watching.insert(key.to_string()) {
            return Ok(());
        }

        let mut events = match self.store.watch(key).await {
            Ok(events) => events,
            Err(e) => {
                self.watching.remove(key);
                return Err(e);
            }
        };

        let cache = self.cache.clone();
        let watching = self.watching.clone();
        let watched = key.to_string();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.kind == WatchEventKind::Delete {
                    debug!(key = %event.key, "Watched key deleted");
                    cache.clear().await;
                }
            }
            watching.remove(&watched);
        });
        self.track(handle);

        debug!(key = key, "Watching key");
        Ok(())
    }

    /// Stop background tasks and release the store
    ///
    /// Registered keys are left to expire with their leases.
    pub async fn destroy(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.watching.clear();
        self.store.close().await;
        info!(store = self.store.name(), "Registry destroyed");
    }

    /// Discovery cache
    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Keys registered by this process
    pub fn local_keys(&self) -> Vec<String> {
        self.local_keys.iter().map(|k| k.clone()).collect()
    }

    /// Whether a key is currently watched
    pub fn is_watching(&self, key: &str) -> bool {
        self.watching.contains(key)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

/// Store key of an instance
pub fn registry_key(meta: &ServiceMetaInfo) -> String {
    format!("{}{}", REGISTRY_ROOT, meta.service_node_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_over(store: &Arc<MemoryStore>) -> ServiceRegistry {
        ServiceRegistry::new(store.clone() as Arc<dyn KvStore>)
    }

    fn meta(host: &str, port: u16) -> ServiceMetaInfo {
        ServiceMetaInfo::new("UserService", host, port)
    }

    #[tokio::test]
    async fn test_register_then_discover() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        let a = meta("10.0.0.1", 8080);

        registry.register(&a).await.unwrap();
        assert_eq!(
            registry.local_keys(),
            vec!["/rpc/UserService:1.0:1.0:10.0.0.1".to_string()]
        );

        let found = registry.discover("UserService:1.0").await.unwrap();
        assert_eq!(found, vec![a.clone()]);
        assert!(registry.is_watching(&registry_key(&a)));
        assert!(registry.cache().get("UserService:1.0").await.is_some());
    }

    #[tokio::test]
    async fn test_discover_unknown_service_fails() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        registry.register(&meta("10.0.0.1", 8080)).await.unwrap();

        let err = registry.discover("OrderService:1.0").await.unwrap_err();
        assert!(matches!(err, RpcError::Discovery(_)));

        // version 1.0 must not match 1.01
        let err = registry.discover("UserService:1.01").await.unwrap_err();
        assert!(matches!(err, RpcError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_unreadable_entries_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("/rpc/UserService:1.0:1.0:bad", "not json", None)
            .await
            .unwrap();
        let registry = registry_over(&store);
        registry.register(&meta("10.0.0.1", 8080)).await.unwrap();

        let found = registry.discover("UserService:1.0").await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_node_excluded_from_fresh_discovery() {
        let store = Arc::new(MemoryStore::new());
        let provider = registry_over(&store);
        let a = meta("10.0.0.1", 8080);
        let b = meta("10.0.0.2", 8080);

        provider.register(&a).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        provider.register(&b).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        let consumer = registry_over(&store);
        let found = consumer.discover("UserService:1.0").await.unwrap();
        assert_eq!(found, vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_lease_evicts_cached_instances() {
        let store = Arc::new(MemoryStore::new());
        let provider = registry_over(&store);
        provider.register(&meta("10.0.0.1", 8080)).await.unwrap();

        let consumer = registry_over(&store);
        assert_eq!(consumer.discover("UserService:1.0").await.unwrap().len(), 1);
        assert_eq!(consumer.cache().len().await, 1);

        // no heartbeat, no store traffic from either side
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(consumer.cache().is_empty().await);
        let err = consumer.discover("UserService:1.0").await.unwrap_err();
        assert!(matches!(err, RpcError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_delete_clears_whole_cache() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        let a = meta("10.0.0.1", 8080);
        let other = ServiceMetaInfo::new("OrderService", "10.0.0.9", 9090);
        registry.register(&a).await.unwrap();
        registry.register(&other).await.unwrap();

        registry.discover("UserService:1.0").await.unwrap();
        registry.discover("OrderService:1.0").await.unwrap();
        assert_eq!(registry.cache().len().await, 2);

        registry.unregister(&a).await.unwrap();
        for _ in 0..10 {
            if registry.cache().is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.cache().is_empty().await);

        let err = registry.discover("UserService:1.0").await.unwrap_err();
        assert!(matches!(err, RpcError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_watch_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        registry.watch("/rpc/k").await.unwrap();
        registry.watch("/rpc/k").await.unwrap();
        assert_eq!(registry.tasks.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_registration_alive() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(registry_over(&store));
        let a = meta("10.0.0.1", 8080);
        let key = registry_key(&a);

        registry.register(&a).await.unwrap();
        let first_lease = store.lease_of(&key).unwrap();

        let shutdown = CancellationToken::new();
        registry.start_heartbeat(shutdown.clone());
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert!(store.get(&key).await.unwrap().is_some());
        assert_ne!(store.lease_of(&key), Some(first_lease));

        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_not_registered_again() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        let a = meta("10.0.0.1", 8080);
        registry.register(&a).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.heartbeat().await, 0);
        assert!(registry.local_keys().is_empty());
        assert!(store.get(&registry_key(&a)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoked_lease_is_not_renewed() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        let a = meta("10.0.0.1", 8080);
        registry.register(&a).await.unwrap();
        assert_eq!(registry.heartbeat().await, 1);

        let lease = store.lease_of(&registry_key(&a)).unwrap();
        store.revoke_lease(lease);
        assert_eq!(registry.heartbeat().await, 0);
    }

    // the only test in this crate that touches the process-wide store
    #[tokio::test]
    async fn test_memory_kind_shares_one_store() {
        let config = RegistryConfig {
            kind: RegistryKind::Memory,
            ..RegistryConfig::default()
        };
        let provider = ServiceRegistry::connect(&config).await.unwrap();
        let consumer = ServiceRegistry::connect(&config).await.unwrap();
        let a = ServiceMetaInfo::new("SharedStoreService", "10.0.0.1", 8080);

        provider.register(&a).await.unwrap();
        let found = consumer.discover("SharedStoreService:1.0").await.unwrap();
        assert_eq!(found, vec![a.clone()]);

        provider.destroy().await;
        let err = consumer.register(&a).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retryable() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_over(&store);
        registry.destroy().await;

        let err = registry.register(&meta("10.0.0.1", 8080)).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        let err = registry.discover("UserService:1.0").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
