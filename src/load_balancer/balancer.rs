//! Cluster registry.
//!
//! # Responsibilities
//! - Own named clusters (node set + session table)
//! - Resolve sessions to nodes, falling back to a dispatch strategy
//! - Expose node snapshots for failover list construction
//! - Own the session cleanup task for its lifetime

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{BalancerError, Result};
use crate::load_balancer::cluster::{Cluster, NodeSnapshot};
use crate::load_balancer::node::{Node, NodeAddr};
use crate::load_balancer::DispatchStrategy;
use crate::observability::metrics;
use crate::session::cleanup::{CleanupHandle, SessionCleanupTask};
use crate::session::store::Resolution;

/// Name of the cluster used when none is configured.
pub const DEFAULT_CLUSTER: &str = "Default";

/// Sessions idle longer than this are evicted (one hour).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Registry of clusters for one balancer.
#[derive(Debug)]
pub struct Balancer {
    name: String,
    clusters: DashMap<String, Arc<Cluster>>,
    session_timeout_ms: AtomicU64,
    cleanup: Mutex<Option<CleanupHandle>>,
}

impl Balancer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clusters: DashMap::new(),
            session_timeout_ms: AtomicU64::new(DEFAULT_SESSION_TIMEOUT.as_millis() as u64),
            cleanup: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // --- Clusters ---

    /// Register a cluster, returning the existing one if the name is taken.
    pub fn add_cluster(&self, name: &str) -> Arc<Cluster> {
        self.clusters
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(balancer = %self.name, cluster = %name, "Cluster registered");
                Arc::new(Cluster::new(name))
            })
            .clone()
    }

    pub fn cluster(&self, name: &str) -> Result<Arc<Cluster>> {
        self.clusters
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| BalancerError::ClusterNotFound(name.to_string()))
    }

    /// All clusters, sorted by name.
    pub fn clusters(&self) -> Vec<Arc<Cluster>> {
        let mut clusters: Vec<_> = self.clusters.iter().map(|r| r.value().clone()).collect();
        clusters.sort_by(|a, b| a.name().cmp(b.name()));
        clusters
    }

    // --- Membership ---

    /// Replace a cluster's node list, registering the cluster if needed.
    pub fn replace_nodes(&self, cluster: &str, addrs: impl IntoIterator<Item = NodeAddr>) {
        let cluster = self.add_cluster(cluster);
        cluster.replace_nodes(addrs);
        tracing::info!(
            cluster = %cluster.name(),
            nodes = cluster.nodes().len(),
            "Cluster membership replaced"
        );
    }

    pub fn add_node(&self, cluster: &str, addr: NodeAddr) -> bool {
        self.add_cluster(cluster).add_node(addr)
    }

    pub fn remove_node(&self, cluster: &str, addr: &NodeAddr) -> Result<bool> {
        Ok(self.cluster(cluster)?.remove_node(addr))
    }

    /// Mark a node up or down.
    pub fn set_node_status(&self, cluster: &str, addr: &NodeAddr, up: bool) -> Result<bool> {
        let Some(node) = self.cluster(cluster)?.member(addr) else {
            return Ok(false);
        };
        if up {
            node.mark_up();
        } else {
            node.mark_down();
        }
        tracing::info!(cluster = %cluster, node = %addr, up, "Node status set");
        metrics::record_node_health(&addr.to_string(), up);
        Ok(true)
    }

    /// Snapshot of a cluster's nodes in registration order.
    pub fn nodes_of(&self, cluster: &str) -> Result<NodeSnapshot> {
        Ok(self.cluster(cluster)?.nodes())
    }

    /// Nodes of a cluster that are not marked down.
    pub fn available_nodes_of(&self, cluster: &str) -> Result<Vec<Arc<Node>>> {
        Ok(self.cluster(cluster)?.available_nodes())
    }

    // --- Sessions ---

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_session_timeout(&self, timeout: Duration) {
        self.session_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Return the node bound to `session_id`, or dispatch and bind a new one.
    ///
    /// A session bound to a down, removed, or expired node is treated as absent.
    pub fn resolve_or_assign(
        &self,
        cluster: &str,
        session_id: &str,
        strategy: &dyn DispatchStrategy,
    ) -> Result<Arc<Node>> {
        let cluster = self.cluster(cluster)?;
        let resolution = cluster.resolve_session(
            session_id,
            Instant::now(),
            self.session_timeout(),
            || strategy.dispatch(&cluster.nodes()),
        )?;

        match resolution {
            Resolution::Reused(node) => {
                tracing::debug!(cluster = %cluster.name(), session_id = %session_id, node = %node, "Session reused");
                Ok(node)
            }
            Resolution::Bound {
                node,
                previous: Some(old),
            } => {
                tracing::info!(
                    cluster = %cluster.name(),
                    session_id = %session_id,
                    old_node = %old,
                    node = %node,
                    "Session reassigned"
                );
                Ok(node)
            }
            Resolution::Bound { node, previous: None } => {
                tracing::debug!(
                    cluster = %cluster.name(),
                    session_id = %session_id,
                    node = %node,
                    "Session assigned"
                );
                Ok(node)
            }
        }
    }

    /// Bind a session to a node, replacing any previous binding.
    pub fn bind(&self, cluster: &str, session_id: &str, node: &Arc<Node>) -> Result<()> {
        let cluster = self.cluster(cluster)?;
        cluster.sessions().bind(session_id, node, Instant::now());
        tracing::debug!(cluster = %cluster.name(), session_id = %session_id, node = %node, "Session bound");
        Ok(())
    }

    /// The node a session is bound to, without refreshing or validating it.
    pub fn bound_node(&self, cluster: &str, session_id: &str) -> Result<Option<Arc<Node>>> {
        Ok(self.cluster(cluster)?.sessions().peek(session_id))
    }

    /// Evict idle sessions from every cluster as of `now`.
    pub fn evict_idle_sessions_at(&self, now: Instant) -> usize {
        let timeout = self.session_timeout();
        // Snapshot the cluster list so no registry shard stays locked during eviction.
        self.clusters()
            .iter()
            .map(|cluster| {
                let evicted = cluster.sessions().evict_idle(now, timeout);
                metrics::record_active_sessions(cluster.name(), cluster.sessions().len());
                if evicted > 0 {
                    tracing::debug!(cluster = %cluster.name(), evicted, "Evicted idle sessions");
                }
                evicted
            })
            .sum()
    }

    pub fn evict_idle_sessions(&self) -> usize {
        self.evict_idle_sessions_at(Instant::now())
    }

    // --- Cleanup task ---

    /// Start the periodic session cleanup task, replacing a running one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let handle = SessionCleanupTask::new(Arc::downgrade(self), interval).spawn();
        let previous = self
            .cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Stop the cleanup task, if running.
    pub fn stop_cleanup(&self) {
        let handle = self.cleanup.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.stop();
            tracing::info!(balancer = %self.name, "Session cleanup stopped");
        }
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER)
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::least_conn::LeastConnections;
    use crate::load_balancer::round_robin::RoundRobin;

    fn balancer_with(ports: &[u16]) -> Balancer {
        let balancer = Balancer::default();
        balancer.replace_nodes(
            DEFAULT_CLUSTER,
            ports.iter().map(|p| NodeAddr::new("10.0.0.1", *p)),
        );
        balancer
    }

    #[test]
    fn test_unknown_cluster() {
        let balancer = Balancer::default();
        let err = balancer
            .resolve_or_assign("nope", "s", &RoundRobin::new())
            .unwrap_err();
        assert_eq!(err, BalancerError::ClusterNotFound("nope".into()));
        assert!(balancer.nodes_of("nope").is_err());
    }

    #[test]
    fn test_resolve_binds_and_reuses() {
        let balancer = balancer_with(&[1, 2, 3]);
        let rr = RoundRobin::new();
        let first = balancer.resolve_or_assign(DEFAULT_CLUSTER, "s1", &rr).unwrap();
        for _ in 0..5 {
            let again = balancer.resolve_or_assign(DEFAULT_CLUSTER, "s1", &rr).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        let other = balancer.resolve_or_assign(DEFAULT_CLUSTER, "s2", &rr).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_down_node_triggers_rebind() {
        let balancer = balancer_with(&[1, 2]);
        let rr = RoundRobin::new();
        let first = balancer.resolve_or_assign(DEFAULT_CLUSTER, "s", &rr).unwrap();
        first.mark_down();

        let second = balancer.resolve_or_assign(DEFAULT_CLUSTER, "s", &rr).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            balancer.bound_node(DEFAULT_CLUSTER, "s").unwrap(),
            Some(second)
        );
    }

    #[test]
    fn test_empty_cluster_has_no_side_effects() {
        let balancer = balancer_with(&[]);
        let err = balancer
            .resolve_or_assign(DEFAULT_CLUSTER, "s", &LeastConnections::new())
            .unwrap_err();
        assert_eq!(err, BalancerError::NoAvailableNode);
        assert!(balancer.bound_node(DEFAULT_CLUSTER, "s").unwrap().is_none());
    }

    #[test]
    fn test_bind_is_last_write_wins() {
        let balancer = balancer_with(&[1, 2]);
        let nodes = balancer.nodes_of(DEFAULT_CLUSTER).unwrap();
        balancer.bind(DEFAULT_CLUSTER, "s", &nodes[0]).unwrap();
        balancer.bind(DEFAULT_CLUSTER, "s", &nodes[1]).unwrap();

        let resolved = balancer
            .resolve_or_assign(DEFAULT_CLUSTER, "s", &RoundRobin::new())
            .unwrap();
        assert_eq!(resolved, nodes[1]);
    }

    #[test]
    fn test_concurrent_resolve_of_new_session_agrees() {
        let balancer = balancer_with(&[1, 2, 3, 4]);
        let rr = RoundRobin::new();
        let barrier = std::sync::Barrier::new(16);

        let resolved: Vec<Arc<Node>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        balancer.resolve_or_assign(DEFAULT_CLUSTER, "new", &rr).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(resolved.iter().all(|n| Arc::ptr_eq(n, &resolved[0])));
        assert_eq!(
            balancer.bound_node(DEFAULT_CLUSTER, "new").unwrap(),
            Some(resolved[0].clone())
        );
    }

    #[test]
    fn test_nodes_of_is_a_snapshot() {
        let balancer = balancer_with(&[1, 2]);
        let snapshot = balancer.nodes_of(DEFAULT_CLUSTER).unwrap();
        balancer.replace_nodes(DEFAULT_CLUSTER, [NodeAddr::new("10.0.0.1", 9)]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(balancer.nodes_of(DEFAULT_CLUSTER).unwrap().len(), 1);
    }

    #[test]
    fn test_set_node_status() {
        let balancer = balancer_with(&[1]);
        let addr = NodeAddr::new("10.0.0.1", 1);
        assert!(balancer.set_node_status(DEFAULT_CLUSTER, &addr, false).unwrap());
        assert!(balancer.available_nodes_of(DEFAULT_CLUSTER).unwrap().is_empty());
        assert!(balancer.set_node_status(DEFAULT_CLUSTER, &addr, true).unwrap());
        assert_eq!(balancer.available_nodes_of(DEFAULT_CLUSTER).unwrap().len(), 1);
        assert!(!balancer
            .set_node_status(DEFAULT_CLUSTER, &NodeAddr::new("x", 2), true)
            .unwrap());
    }
}
