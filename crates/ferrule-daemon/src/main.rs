//! ferrule daemon
//!
//! Provider process hosting the built-in echo service.

mod echo;

use anyhow::Context;
use clap::Parser;
use ferrule_core::{RegistryKind, RpcConfig};
use ferrule_rpc::{Provider, RpcContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::echo::EchoService;

/// ferruled - provider daemon for the ferrule RPC runtime
#[derive(Parser, Debug)]
#[command(name = "ferruled")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); FERRULE_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind and register
    #[arg(long)]
    host: Option<String>,

    /// Port to bind and register
    #[arg(long)]
    port: Option<u16>,

    /// Registry backend (etcd, memory)
    #[arg(long)]
    registry: Option<RegistryKind>,

    /// Registry address, comma separated for several etcd endpoints
    #[arg(long)]
    registry_address: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut RpcConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(kind) = self.registry {
            config.registry.kind = kind;
        }
        if let Some(address) = &self.registry_address {
            config.registry.address = address.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        RpcConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting ferrule daemon v{}", env!("CARGO_PKG_VERSION"));

    let context = RpcContext::init(config)
        .await
        .context("Failed to connect to the registry")?;
    let provider = Provider::new(context.clone())
        .service(Arc::new(EchoService))
        .start()
        .await
        .context("Failed to start provider")?;

    info!(addr = %provider.local_addr(), "Serving, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    context.shutdown().await;
    provider.join().await?;

    Ok(())
}
