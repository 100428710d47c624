//! In-process store backend
//!
//! Leases expire on tokio time, so tests can drive expiry with a paused
//! clock. A background task wakes at the nearest lease deadline and removes
//! the expired keys, notifying their watchers. Store operations also purge
//! expired leases before they read or write.

use async_trait::async_trait;
use ferrule_core::{RpcError, RpcResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::store::{KvStore, WatchEvent, WatchEventKind, WatchReceiver};

struct Entry {
    value: String,
    lease: Option<i64>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<i64, Instant>,
    watchers: HashMap<String, Vec<UnboundedSender<WatchEvent>>>,
    next_lease: i64,
    closed: bool,
}

impl Inner {
    fn notify(&mut self, kind: WatchEventKind, key: &str) {
        if let Some(senders) = self.watchers.get_mut(key) {
            senders.retain(|tx| {
                tx.send(WatchEvent {
                    kind,
                    key: key.to_string(),
                })
                .is_ok()
            });
        }
    }

    fn remove_lease(&mut self, lease_id: i64) {
        self.leases.remove(&lease_id);
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease_id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.entries.remove(&key);
            debug!(key = %key, lease_id = lease_id, "Lease expired, key removed");
            self.notify(WatchEventKind::Delete, &key);
        }
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<i64> = self
            .leases
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in expired {
            self.remove_lease(lease_id);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leases.values().min().copied()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Remove expired leases as their deadlines pass
///
/// Exits once the store is closed or dropped.
async fn expire_leases(inner: Weak<Mutex<Inner>>, wake: Arc<Notify>) {
    loop {
        let deadline = {
            let Some(state) = inner.upgrade() else { break };
            let mut state = lock(&state);
            if state.closed {
                break;
            }
            state.purge_expired();
            state.next_deadline()
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
    debug!("Lease expiry task stopped");
}

/// Store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    /// Wakes the expiry task when a lease is granted or the store closes
    wake: Arc<Notify>,
    expiry: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store shared by every registry of this process
    ///
    /// Closing it, which `ServiceRegistry::destroy` does, closes it for every
    /// holder.
    pub fn shared() -> Arc<MemoryStore> {
        static SHARED: OnceLock<Arc<MemoryStore>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(MemoryStore::new())).clone()
    }

    /// Expire a lease immediately, removing its keys
    pub fn revoke_lease(&self, lease_id: i64) {
        self.lock().remove_lease(lease_id);
        self.wake.notify_one();
    }

    /// Lease currently bound to a key
    pub fn lease_of(&self, key: &str) -> Option<i64> {
        let mut inner = self.lock();
        inner.purge_expired();
        inner.entries.get(key).and_then(|entry| entry.lease)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Make sure the expiry task runs and let it pick up a new deadline
    ///
    /// The task is respawned when the runtime that ran it has gone away.
    fn schedule_expiry(&self) {
        let mut expiry = self.expiry.lock().unwrap_or_else(|e| e.into_inner());
        if expiry.as_ref().map_or(true, |task| task.is_finished()) {
            let task = tokio::spawn(expire_leases(
                Arc::downgrade(&self.inner),
                self.wake.clone(),
            ));
            *expiry = Some(task);
        }
        self.wake.notify_one();
    }

    /// Lock, reject calls after close and drop expired leases
    fn open(&self) -> RpcResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RpcError::Transport("memory store is closed".to_string()));
        }
        inner.purge_expired();
        Ok(inner)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn grant_lease(&self, ttl_secs: i64) -> RpcResult<i64> {
        let lease_id = {
            let mut inner = self.open()?;
            inner.next_lease += 1;
            let lease_id = inner.next_lease;
            let ttl = Duration::from_secs(ttl_secs.max(0) as u64);
            inner.leases.insert(lease_id, Instant::now() + ttl);
            lease_id
        };
        self.schedule_expiry();
        Ok(lease_id)
    }

    async fn put(&self, key: &str, value: &str, lease_id: Option<i64>) -> RpcResult<()> {
        let mut inner = self.open()?;
        if let Some(id) = lease_id {
            if !inner.leases.contains_key(&id) {
                return Err(RpcError::Transport(format!("lease {} not found", id)));
            }
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease: lease_id,
            },
        );
        inner.notify(WatchEventKind::Put, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> RpcResult<Option<String>> {
        let inner = self.open()?;
        Ok(inner.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn get_prefix(&self, prefix: &str) -> RpcResult<Vec<(String, String)>> {
        let inner = self.open()?;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> RpcResult<()> {
        let mut inner = self.open()?;
        if inner.entries.remove(key).is_some() {
            inner.notify(WatchEventKind::Delete, key);
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> RpcResult<WatchReceiver> {
        let mut inner = self.open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.watchers.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
            inner.watchers.clear();
        }
        self.wake.notify_one();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.wake.notify_one();
    }
}
