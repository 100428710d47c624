//! Application context

use ferrule_core::{RpcConfig, RpcResult};
use ferrule_network::{LoadBalancer, RetryStrategy, TcpTransport, TolerantStrategy};
use ferrule_registry::{KvStore, ServiceRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatcher::Dispatcher;

/// Everything a process needs to make and serve calls
///
/// Created once at startup and shared through an `Arc`. Dropping the last
/// reference cancels the background tasks; [`shutdown`](Self::shutdown) also
/// releases the registry connection.
pub struct RpcContext {
    config: RpcConfig,
    registry: Arc<ServiceRegistry>,
    /// Shared by every dispatcher so round robin rotates process-wide
    balancer: LoadBalancer,
    retry: RetryStrategy,
    tolerant: TolerantStrategy,
    transport: TcpTransport,
    shutdown: CancellationToken,
}

impl RpcContext {
    /// Connect to the configured registry and start lease renewal
    pub async fn init(config: RpcConfig) -> RpcResult<Arc<Self>> {
        let registry = ServiceRegistry::connect(&config.registry).await?;
        Ok(Self::assemble(config, registry))
    }

    /// Use an already connected store instead of the configured one
    pub fn with_store(config: RpcConfig, store: Arc<dyn KvStore>) -> Arc<Self> {
        Self::assemble(config, ServiceRegistry::new(store))
    }

    fn assemble(config: RpcConfig, registry: ServiceRegistry) -> Arc<Self> {
        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();
        registry.start_heartbeat(shutdown.child_token());

        info!(
            name = %config.name,
            serializer = %config.serializer,
            load_balancer = %config.load_balancer,
            retry = %config.retry_strategy,
            tolerant = %config.tolerant_strategy,
            mock = config.mock,
            "RPC context initialized"
        );

        Arc::new(Self {
            balancer: LoadBalancer::new(config.load_balancer),
            retry: RetryStrategy::from_kind(config.retry_strategy),
            tolerant: TolerantStrategy::from_kind(config.tolerant_strategy),
            transport: TcpTransport::default(),
            config,
            registry,
            shutdown,
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn retry(&self) -> &RetryStrategy {
        &self.retry
    }

    pub fn tolerant(&self) -> &TolerantStrategy {
        &self.tolerant
    }

    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    /// Token cancelled on shutdown; background tasks should derive from it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatcher bound to this context
    pub fn dispatcher(self: &Arc<Self>) -> Dispatcher {
        Dispatcher::new(self.clone())
    }

    /// Stop background tasks and the server loop, then release the registry
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.destroy().await;
        info!(name = %self.config.name, "RPC context shut down");
    }
}

impl Drop for RpcContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
