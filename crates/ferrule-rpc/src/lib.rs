//! ferrule-rpc: Remote calls over a service registry
//!
//! This crate composes the other ferrule crates:
//! - `RpcContext`, created once at startup and shared by every component
//! - `Dispatcher`, which runs discovery, balancing, retry and fault handling
//! - `Provider`, which hosts services and registers them

pub mod context;
pub mod dispatcher;
pub mod provider;

pub use context::RpcContext;
pub use dispatcher::{Dispatcher, Invocation};
pub use provider::{Provider, ProviderHandle};

pub use ferrule_core::{
    Request, Response, RpcConfig, RpcError, RpcResult, SerializerKind, ServiceMetaInfo,
};
pub use ferrule_server::{unknown_method, Arguments, Reply, Service};
