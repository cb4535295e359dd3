//! Tenant fleet node (v1)
//!
//! Boots a server orchestrator that supervises one tenant engine per tenant.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────┐
//!   │                     SERVER ORCHESTRATOR                         │
//!   │                                                                 │
//!   │  identity ─▶ base services ─▶ user/tenant management            │
//!   │                   │                                             │
//!   │                   ▼                                             │
//!   │     ┌──────────────────────────────┐   bounded pool (width W)   │
//!   │     │ fleet initialize / start     │──▶ TenantEngine (tenant 1) │
//!   │     └──────────────────────────────┘──▶ TenantEngine (tenant 2) │
//!   │                                     ──▶ ...                     │
//!   │                                                                 │
//!   │  base services include one API demultiplexer per peer service:  │
//!   │     ApiDemux ─▶ routing ─▶ ApiChannel ─▶ ConnectionChannel ─────┼──▶ peer replicas
//!   │                                                                 │
//!   │  cross-cutting: config · lifecycle · resilience · observability │
//!   └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tenant_fleet::channel::{strategy_for, ApiDemux, ChannelSettings, ConnectionChannel, RemoteApiChannel};
use tenant_fleet::config::{load_config, FleetConfig, PeerConfig};
use tenant_fleet::lifecycle::signals::wait_for_shutdown_signal;
use tenant_fleet::lifecycle::{LifecycleComponent, LifecycleStatus, ProgressMonitor};
use tenant_fleet::management::memory::{LocalTenantBindings, MemoryTenantManagement, MemoryUserManagement};
use tenant_fleet::management::ServerBindings;
use tenant_fleet::observability::{logging, metrics};
use tenant_fleet::server::{FileResources, ServerOrchestrator};

#[derive(Debug, Parser)]
#[command(name = "tenant-fleet", version, about = "Multi-tenant service fleet node")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn peer_demux(peer: &PeerConfig, config: &FleetConfig) -> Arc<dyn LifecycleComponent> {
    let settings = ChannelSettings::from_config(&config.channels);
    let port = peer.port.unwrap_or(config.channels.port);
    let service = peer.service.clone();

    let demux = ApiDemux::new(peer.service.clone(), move |host: &str| -> tenant_fleet::Result<Arc<RemoteApiChannel>> {
        Ok(Arc::new(RemoteApiChannel::new(ConnectionChannel::new(
            service.clone(),
            host,
            port,
            settings.clone(),
        ))))
    })
    .with_routing(strategy_for(config.channels.routing))
    .with_seed_hosts(peer.hosts.clone())
    .with_poll_interval(std::time::Duration::from_millis(config.channels.poll_interval_ms));

    Arc::new(demux)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => FleetConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.server.data_dir = data_dir;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tenant-fleet starting");
    tracing::info!(
        instance_id = %config.server.instance_id,
        data_dir = %config.server.data_dir.display(),
        tenants = config.tenants.len(),
        peers = config.peers.len(),
        pool_width = config.fleet.pool_width,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let bindings = ServerBindings {
        auxiliary: config.peers.iter().map(|peer| peer_demux(peer, &config)).collect(),
        tenant_management: Some(MemoryTenantManagement::new(config.tenants.clone())),
        user_management: Some(MemoryUserManagement::new(config.users.clone())),
        tenant_bindings: Some(Arc::new(LocalTenantBindings)),
    };
    let resources = Arc::new(FileResources::new(config.server.data_dir.clone()));
    let server = ServerOrchestrator::new(config, bindings, resources);

    let monitor = ProgressMonitor::new("Initialize server");
    server.initialize(&monitor).await?;
    if server.status() != LifecycleStatus::Stopped {
        return Err(format!("server failed to initialize: {:?}", server.core().last_error()).into());
    }

    let monitor = ProgressMonitor::new("Start server");
    server.start(&monitor).await?;
    if server.status() != LifecycleStatus::Started {
        return Err(format!("server failed to start: {:?}", server.core().last_error()).into());
    }
    tracing::info!(node_id = ?server.node_id(), engines = server.tenant_engines().len(), "Server started");

    wait_for_shutdown_signal().await;

    server.stop(&ProgressMonitor::new("Stop server")).await?;
    server.terminate(&ProgressMonitor::new("Terminate server")).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
