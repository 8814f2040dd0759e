//! Cluster Balancer
//!
//! An HTTP reverse proxy that spreads requests over a cluster of nodes,
//! with sticky sessions and failover.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                  CLUSTER BALANCER                    │
//!                      │                                                      │
//!   Client Request     │  ┌─────────┐    ┌──────────────┐    ┌────────────┐   │
//!   ───────────────────┼─▶│  http   │───▶│ interceptor  │───▶│  balancer  │   │
//!                      │  │ server  │    │ (request)    │    │ + sessions │   │
//!                      │  └────┬────┘    └──────────────┘    └─────┬──────┘   │
//!                      │       │        destinations ◀─────────────┘          │
//!                      │       ▼                                              │
//!                      │  ┌─────────┐                                         │
//!                      │  │ forward │──── primary, then failover nodes ───────┼──▶ Nodes
//!                      │  └────┬────┘                                         │
//!   Client Response    │       ▼                                              │
//!   ◀──────────────────┼── interceptor (response): counters, health, binding   │
//!                      │                                                      │
//!                      │  Background: session cleanup, health monitor,        │
//!                      │  config watcher, admin API, metrics exporter         │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use cluster_balancer::config::loader::load_config;
use cluster_balancer::config::watcher::ConfigWatcher;
use cluster_balancer::config::ProxyConfig;
use cluster_balancer::lifecycle::signals::shutdown_on_signal;
use cluster_balancer::lifecycle::Shutdown;
use cluster_balancer::observability::{logging, metrics};
use cluster_balancer::HttpServer;

#[derive(Parser)]
#[command(name = "cluster-balancer")]
#[command(about = "HTTP load balancer with session affinity", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted
    #[arg(short, long, env = "BALANCER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cluster-balancer starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        cluster = %config.balancer.cluster,
        strategy = ?config.balancer.strategy,
        clusters = config.clusters.len(),
        session_timeout_ms = config.balancer.session_timeout_ms,
        "Configuration loaded"
    );

    // Bind TCP listener
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops delivering updates once dropped.
    let (_watcher, updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(guard) => (Some(guard), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config);
    server.run(listener, updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
