//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check every registered node
//! - Update node health state based on results
//! - Restart with new settings when the configuration changes

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::lifecycle::Shutdown;
use crate::load_balancer::balancer::Balancer;
use crate::load_balancer::node::Node;
use crate::observability::metrics;

pub struct HealthMonitor {
    balancer: Arc<Balancer>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(balancer: Arc<Balancer>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            balancer,
            config,
            client,
        }
    }

    /// Check all nodes on every tick until `stop` completes.
    pub async fn run(self, stop: impl Future<Output = ()> + Send) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = &mut stop => {
                    tracing::info!("Health monitor stopped");
                    break;
                }
            }
        }
    }

    /// Check every node of every cluster once.
    pub async fn check_all(&self) {
        for cluster in self.balancer.clusters() {
            for node in cluster.nodes().iter() {
                self.check_node(node).await;
            }
        }
    }

    async fn check_node(&self, node: &Node) {
        let request = match Request::builder()
            .method("GET")
            .uri(node.destination(&self.config.path))
            .header("user-agent", "cluster-balancer-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(node = %node, error = %e, "Failed to build health check request");
                return;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let healthy = match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(node = %node, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(node = %node, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(node = %node, "Health check failed: timeout");
                false
            }
        };

        let changed = if healthy {
            node.mark_success(self.config.healthy_threshold as usize)
        } else {
            node.mark_failure(self.config.unhealthy_threshold as usize)
        };
        if changed {
            tracing::info!(node = %node, health = ?node.health(), "Node health changed");
        }
        metrics::record_node_health(&node.to_string(), !node.is_down());
    }
}

/// The health monitor currently running, if checks are enabled.
///
/// Every monitor it starts also stops on the process-wide `shutdown`.
pub struct MonitorHandle {
    balancer: Arc<Balancer>,
    config: HealthCheckConfig,
    shutdown: Shutdown,
    stop: Option<Shutdown>,
}

impl MonitorHandle {
    /// Must be called from within a Tokio runtime.
    pub fn start(balancer: Arc<Balancer>, config: HealthCheckConfig, shutdown: Shutdown) -> Self {
        let mut handle = Self {
            balancer,
            config,
            shutdown,
            stop: None,
        };
        handle.spawn();
        handle
    }

    fn spawn(&mut self) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }
        let stop = Shutdown::new();
        let stopped = stop.signalled();
        let shutdown = self.shutdown.signalled();
        let monitor = HealthMonitor::new(self.balancer.clone(), self.config.clone());
        tokio::spawn(monitor.run(async move {
            tokio::select! {
                _ = stopped => {}
                _ = shutdown => {}
            }
        }));
        self.stop = Some(stop);
    }

    /// Replace the running monitor if `config` differs from its settings.
    ///
    /// Returns whether a restart happened.
    pub fn reconfigure(&mut self, config: &HealthCheckConfig) -> bool {
        if *config == self.config {
            return false;
        }
        if let Some(stop) = self.stop.take() {
            stop.trigger();
        }
        self.config = config.clone();
        tracing::info!(
            enabled = config.enabled,
            interval = config.interval_secs,
            "Health monitor reconfigured"
        );
        self.spawn();
        true
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }
}
