//! Coordination store abstraction

use async_trait::async_trait;
use ferrule_core::RpcResult;
use tokio::sync::mpsc;

/// Kind of change reported by a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// Change notification for a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
}

/// Receiving end of a watch
pub type WatchReceiver = mpsc::UnboundedReceiver<WatchEvent>;

/// Key-value store with leases and watches
///
/// Failures to reach the store surface as `RpcError::Transport`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Grant a lease that expires after `ttl_secs` unless its keys are re-put
    async fn grant_lease(&self, ttl_secs: i64) -> RpcResult<i64>;

    /// Write a key, optionally bound to a lease
    async fn put(&self, key: &str, value: &str, lease_id: Option<i64>) -> RpcResult<()>;

    /// Read a single key
    async fn get(&self, key: &str) -> RpcResult<Option<String>>;

    /// Read every key starting with `prefix`, ordered by key
    async fn get_prefix(&self, prefix: &str) -> RpcResult<Vec<(String, String)>>;

    /// Delete a key
    async fn delete(&self, key: &str) -> RpcResult<()>;

    /// Subscribe to changes of a single key
    async fn watch(&self, key: &str) -> RpcResult<WatchReceiver>;

    /// Release connections and stop watches
    async fn close(&self);

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
