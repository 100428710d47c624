//! Provider bootstrap

use ferrule_core::{RpcError, RpcResult, ServiceMetaInfo};
use ferrule_server::{RpcServer, Service, ServiceMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::context::RpcContext;

/// Hosts services and registers them under the configured server address
pub struct Provider {
    context: Arc<RpcContext>,
    services: Arc<ServiceMap>,
}

impl Provider {
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self {
            context,
            services: Arc::new(ServiceMap::new()),
        }
    }

    /// Add a service to host
    pub fn service(self, service: Arc<dyn Service>) -> Self {
        self.services.register(service);
        self
    }

    /// Bind the server, register every service and serve until the context
    /// shuts down
    ///
    /// Port 0 binds an ephemeral port; the bound port is what gets registered.
    pub async fn start(self) -> RpcResult<ProviderHandle> {
        let server_config = &self.context.config().server;
        let bind_addr = format!("{}:{}", server_config.host, server_config.port);
        let server = RpcServer::bind(&bind_addr, self.services.clone()).await?;
        let local_addr = server.local_addr()?;

        let mut registered = Vec::with_capacity(self.services.len());
        for key in self.services.keys() {
            let service = self
                .services
                .get(&key)
                .ok_or_else(|| RpcError::Internal(format!("service {} vanished", key)))?;
            let meta = ServiceMetaInfo::new(service.name(), &server_config.host, local_addr.port())
                .with_version(service.version());
            self.context.registry().register(&meta).await?;
            registered.push(meta);
        }

        info!(
            addr = %local_addr,
            services = registered.len(),
            "Provider started"
        );

        let task = tokio::spawn(server.serve(self.context.shutdown_token()));
        Ok(ProviderHandle {
            local_addr,
            registered,
            task,
        })
    }
}

/// A running provider
pub struct ProviderHandle {
    local_addr: SocketAddr,
    registered: Vec<ServiceMetaInfo>,
    task: JoinHandle<RpcResult<()>>,
}

impl ProviderHandle {
    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registrations made at startup
    pub fn registered(&self) -> &[ServiceMetaInfo] {
        &self.registered
    }

    /// Wait for the server loop to end
    pub async fn join(self) -> RpcResult<()> {
        self.task
            .await
            .map_err(|e| RpcError::Internal(format!("server task failed: {}", e)))?
    }
}
