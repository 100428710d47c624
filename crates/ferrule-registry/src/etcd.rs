//! etcd store backend

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions};
use ferrule_core::{RegistryConfig, RpcError, RpcResult};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{KvStore, WatchEvent, WatchEventKind, WatchReceiver};

fn transport(op: &str, err: etcd_client::Error) -> RpcError {
    RpcError::Transport(format!("etcd {} failed: {}", op, err))
}

/// Store backed by an etcd cluster
pub struct EtcdStore {
    client: Client,
    watch_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EtcdStore {
    /// Connect using the registry configuration
    pub async fn connect(config: &RegistryConfig) -> RpcResult<Self> {
        let mut options =
            ConnectOptions::new().with_connect_timeout(Duration::from_millis(config.timeout_ms));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let endpoints = config.endpoints();
        let client = Client::connect(&endpoints, Some(options))
            .await
            .map_err(|e| transport("connect", e))?;

        info!(endpoints = ?endpoints, "Connected to etcd");

        Ok(Self {
            client,
            watch_tasks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn grant_lease(&self, ttl_secs: i64) -> RpcResult<i64> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| transport("lease grant", e))?;
        Ok(lease.id())
    }

    async fn put(&self, key: &str, value: &str, lease_id: Option<i64>) -> RpcResult<()> {
        let mut client = self.client.clone();
        let options = lease_id.map(|id| PutOptions::new().with_lease(id));
        client
            .put(key, value, options)
            .await
            .map_err(|e| transport("put", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> RpcResult<Option<String>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(|e| transport("get", e))?;
        resp.kvs()
            .first()
            .map(|kv| {
                kv.value_str()
                    .map(str::to_string)
                    .map_err(|e| RpcError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn get_prefix(&self, prefix: &str) -> RpcResult<Vec<(String, String)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| transport("prefix get", e))?;

        let mut entries = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match (kv.key_str(), kv.value_str()) {
                (Ok(key), Ok(value)) => entries.push((key.to_string(), value.to_string())),
                _ => warn!(prefix = prefix, "Skipping non UTF-8 entry"),
            }
        }
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> RpcResult<()> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| transport("delete", e))?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> RpcResult<WatchReceiver> {
        let mut client = self.client.clone();
        let (watcher, mut stream) = client
            .watch(key, None)
            .await
            .map_err(|e| transport("watch", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watched = key.to_string();
        let handle = tokio::spawn(async move {
            // dropping the watcher cancels the server-side watch
            let _watcher = watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let kind = match event.event_type() {
                                EventType::Put => WatchEventKind::Put,
                                EventType::Delete => WatchEventKind::Delete,
                            };
                            let key = event
                                .kv()
                                .and_then(|kv| kv.key_str().ok())
                                .unwrap_or(watched.as_str())
                                .to_string();
                            if tx.send(WatchEvent { kind, key }).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(key = %watched, "Watch stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(key = %watched, error = %e, "Watch failed");
                        break;
                    }
                }
            }
        });

        self.watch_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(rx)
    }

    async fn close(&self) {
        let tasks: Vec<_> = self
            .watch_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        info!("etcd store closed");
    }

    fn name(&self) -> &'static str {
        "etcd"
    }
}
