//! Load-balancing interceptor.
//!
//! # Request phase
//! 1. Resolve the node: session affinity if an id is present, else the strategy
//! 2. No node → local 500 response, `Outcome::Abort`, nothing else touched
//! 3. Count the dispatch, stash the node, write primary + failover destinations
//!
//! # Response phase
//! 1. Take the stashed node (so a repeated call is a no-op)
//! 2. Record latency/outcome and passive health
//! 3. Bind a session id first seen on the response
//! 4. Release the in-flight slot

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use axum::http::StatusCode;
use tokio::time::Instant;

use crate::config::{FailoverConfig, HealthCheckConfig, ProxyConfig, StrategyKind};
use crate::error::{BalancerError, Result};
use crate::interceptor::exchange::{Exchange, ResponseHead};
use crate::interceptor::Outcome;
use crate::load_balancer::balancer::Balancer;
use crate::load_balancer::node::{Node, NodeAddr};
use crate::load_balancer::{DispatchStrategy, Strategy};
use crate::observability::metrics;
use crate::session::extractor::SessionExtractor;

/// The node chosen for an exchange, kept until its response phase.
#[derive(Debug, Clone)]
pub struct DispatchedNode {
    pub node: Arc<Node>,
    pub dispatched_at: Instant,
}

/// Orchestrates node selection and bookkeeping for one cluster.
#[derive(Debug)]
pub struct LoadBalancingInterceptor {
    balancer: Arc<Balancer>,
    cluster: String,
    strategy: ArcSwap<Strategy>,
    extractor: ArcSwapOption<SessionExtractor>,
    failover: ArcSwap<FailoverConfig>,
    unhealthy_threshold: AtomicU32,
    healthy_threshold: AtomicU32,
}

impl LoadBalancingInterceptor {
    /// Interceptor dispatching to `cluster` with round-robin, no affinity, failover on.
    pub fn new(balancer: Arc<Balancer>, cluster: impl Into<String>) -> Self {
        let health = HealthCheckConfig::default();
        Self {
            balancer,
            cluster: cluster.into(),
            strategy: ArcSwap::from_pointee(Strategy::default()),
            extractor: ArcSwapOption::empty(),
            failover: ArcSwap::from_pointee(FailoverConfig::default()),
            unhealthy_threshold: AtomicU32::new(health.unhealthy_threshold),
            healthy_threshold: AtomicU32::new(health.healthy_threshold),
        }
    }

    /// Build an interceptor and its balancer state from configuration.
    pub fn from_config(balancer: Arc<Balancer>, config: &ProxyConfig) -> Self {
        let interceptor = Self::new(balancer, config.balancer.cluster.clone());
        interceptor.apply_config(config);
        interceptor
    }

    /// Apply a (re)loaded configuration through the mutation operations.
    ///
    /// Clusters missing from the new configuration are left registered.
    pub fn apply_config(&self, config: &ProxyConfig) {
        if self.strategy.load().kind() != config.balancer.strategy {
            self.set_strategy(config.balancer.strategy);
        }
        self.set_extractor(config.balancer.session_id.as_ref().map(SessionExtractor::from));
        self.set_session_timeout(Duration::from_millis(config.balancer.session_timeout_ms));
        self.set_failover(config.balancer.failover);
        self.set_health_thresholds(
            config.health_check.unhealthy_threshold,
            config.health_check.healthy_threshold,
        );
        for cluster in &config.clusters {
            self.balancer.replace_nodes(&cluster.name, cluster.nodes.iter().cloned());
        }
        self.balancer.add_cluster(&self.cluster);
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    // --- Mutation operations ---

    pub fn set_strategy(&self, kind: StrategyKind) {
        tracing::info!(cluster = %self.cluster, strategy = ?kind, "Dispatch strategy set");
        self.strategy.store(Arc::new(Strategy::from(kind)));
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.load().kind()
    }

    pub fn set_extractor(&self, extractor: Option<SessionExtractor>) {
        self.extractor.store(extractor.map(Arc::new));
    }

    pub fn extractor(&self) -> Option<Arc<SessionExtractor>> {
        self.extractor.load_full()
    }

    pub fn set_session_timeout(&self, timeout: Duration) {
        self.balancer.set_session_timeout(timeout);
    }

    pub fn set_failover(&self, failover: FailoverConfig) {
        self.failover.store(Arc::new(failover));
    }

    pub fn failover(&self) -> FailoverConfig {
        **self.failover.load()
    }

    pub fn set_health_thresholds(&self, unhealthy: u32, healthy: u32) {
        self.unhealthy_threshold.store(unhealthy.max(1), Ordering::Relaxed);
        self.healthy_threshold.store(healthy.max(1), Ordering::Relaxed);
    }

    /// Replace the node list of this interceptor's cluster.
    pub fn replace_nodes(&self, addrs: impl IntoIterator<Item = NodeAddr>) {
        self.balancer.replace_nodes(&self.cluster, addrs);
    }

    // --- Request phase ---

    /// Choose a node and write the destination list.
    ///
    /// `NoAvailableNode` is answered locally with a 500 and `Outcome::Abort`;
    /// `ClusterNotFound` is returned to the caller.
    pub fn handle_request(&self, exc: &mut Exchange) -> Result<Outcome> {
        let node = match self.dispatched_node(exc) {
            Ok(node) => node,
            Err(BalancerError::NoAvailableNode) => {
                tracing::warn!(cluster = %self.cluster, uri = %exc.original_uri(), "No node available");
                metrics::record_no_available_node(&self.cluster);
                exc.destinations_mut().clear();
                exc.set_response(ResponseHead::internal_server_error());
                return Ok(Outcome::Abort);
            }
            Err(e) => {
                tracing::error!(cluster = %self.cluster, error = %e, "Dispatch failed");
                return Err(e);
            }
        };

        let path_and_query = request_path(exc);
        let failover = self.failover();
        let failover_nodes = if failover.enabled {
            Some(self.balancer.nodes_of(&self.cluster)?)
        } else {
            None
        };

        node.increment_dispatch_count();
        node.increment_in_flight();
        metrics::record_dispatch(&self.cluster, &node.to_string(), node.in_flight());

        let destinations = exc.destinations_mut();
        destinations.clear();
        destinations.push(node.destination(&path_and_query));
        if let Some(nodes) = failover_nodes {
            destinations.extend(
                nodes
                    .iter()
                    .filter(|n| n.addr() != node.addr())
                    .filter(|n| failover.include_down || !n.is_down())
                    .map(|n| n.destination(&path_and_query)),
            );
        }

        tracing::debug!(
            cluster = %self.cluster,
            node = %node,
            destinations = exc.destinations().len(),
            "Request dispatched"
        );

        exc.properties_mut().insert(DispatchedNode {
            node,
            dispatched_at: Instant::now(),
        });
        Ok(Outcome::Continue)
    }

    fn dispatched_node(&self, exc: &Exchange) -> Result<Arc<Node>> {
        let strategy = self.strategy.load();
        let session_id = self
            .extractor
            .load()
            .as_ref()
            .and_then(|ex| ex.extract(exc.request()));

        match session_id {
            Some(id) => self
                .balancer
                .resolve_or_assign(&self.cluster, &id, strategy.as_ref()),
            None => {
                tracing::trace!(cluster = %self.cluster, "No session id found");
                strategy.dispatch(&self.balancer.nodes_of(&self.cluster)?)
            }
        }
    }

    // --- Response phase ---

    /// Release the dispatched node and record the outcome.
    ///
    /// Does nothing for an exchange that was never dispatched or was already completed.
    pub fn handle_response(&self, exc: &mut Exchange) {
        let Some(DispatchedNode { node, dispatched_at }) = exc.properties_mut().remove::<DispatchedNode>() else {
            tracing::trace!(cluster = %self.cluster, "Response for undispatched exchange");
            return;
        };
        let latency = dispatched_at.elapsed();

        let status = exc.response().map(|r| r.status);
        let primary_failed = exc
            .destinations()
            .first()
            .is_some_and(|primary| exc.failed_destinations().contains(primary));
        let failed = primary_failed || status.map_or(true, is_node_failure);

        node.record_outcome(latency, status.filter(|_| !primary_failed), failed);
        metrics::record_request(
            &self.cluster,
            &node.to_string(),
            status.map_or(StatusCode::BAD_GATEWAY.as_u16(), |s| s.as_u16()),
            latency,
        );
        self.update_health(&node, failed);

        if let (Some(extractor), Some(response)) = (self.extractor.load_full(), exc.response()) {
            if !response.local {
                if let Some(session_id) = extractor.extract(response) {
                    self.bind_response_session(&session_id, &node);
                }
            }
        }

        node.decrement_in_flight();
        metrics::record_in_flight(&node.to_string(), node.in_flight());
    }

    /// Release the dispatched node of an exchange whose response will never come.
    ///
    /// Nothing is recorded against the node: the caller gave up, not the node.
    /// Does nothing once the response phase has run.
    pub fn handle_abandoned(&self, exc: &mut Exchange) {
        let Some(DispatchedNode { node, .. }) = exc.properties_mut().remove::<DispatchedNode>() else {
            return;
        };
        tracing::debug!(cluster = %self.cluster, node = %node, "Exchange abandoned before its response");
        node.decrement_in_flight();
        metrics::record_in_flight(&node.to_string(), node.in_flight());
    }

    fn update_health(&self, node: &Node, failed: bool) {
        if failed {
            if node.mark_failure(self.unhealthy_threshold.load(Ordering::Relaxed) as usize) {
                tracing::warn!(cluster = %self.cluster, node = %node, "Node marked down after consecutive failures");
                metrics::record_node_health(&node.to_string(), false);
            }
        } else if node.mark_success(self.healthy_threshold.load(Ordering::Relaxed) as usize) {
            tracing::info!(cluster = %self.cluster, node = %node, "Node marked up");
            metrics::record_node_health(&node.to_string(), true);
        }
    }

    fn bind_response_session(&self, session_id: &str, node: &Arc<Node>) {
        match self.balancer.bound_node(&self.cluster, session_id) {
            Ok(Some(bound)) if Arc::ptr_eq(&bound, node) => {}
            Ok(_) => {
                if let Err(e) = self.balancer.bind(&self.cluster, session_id, node) {
                    tracing::warn!(cluster = %self.cluster, error = %e, "Failed to bind session");
                }
            }
            Err(e) => tracing::warn!(cluster = %self.cluster, error = %e, "Failed to look up session"),
        }
    }
}

/// 502/503/504 mean the node could not serve; other statuses are the application's.
fn is_node_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Path and query of the original request, with any scheme and authority stripped.
fn request_path(exc: &Exchange) -> String {
    exc.original_uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| pq.starts_with('/'))
        .unwrap_or("/")
        .to_string()
}
