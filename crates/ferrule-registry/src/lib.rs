//! ferrule-registry: Service registration and discovery
//!
//! This crate keeps the set of live providers in a coordination store:
//! - Lease-bound registration with periodic renewal
//! - Prefix discovery backed by a local cache
//! - Watch-driven cache invalidation
//! - etcd and in-memory store backends

pub mod cache;
pub mod etcd;
pub mod memory;
pub mod registry;
pub mod store;

pub use cache::RegistryCache;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use registry::{registry_key, ServiceRegistry, HEARTBEAT_INTERVAL, LEASE_TTL_SECS, REGISTRY_ROOT};
pub use store::{KvStore, WatchEvent, WatchEventKind, WatchReceiver};
