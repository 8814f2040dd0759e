//! A named group of nodes with its session table.
//!
//! # Design Decisions
//! - Node membership lives behind `ArcSwap`; readers take a snapshot and never lock
//! - Replacing membership reuses surviving `Node`s so counters and sessions carry over
//! - Node identity (host, port) is unique within a cluster

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::Instant;

use crate::error::Result;
use crate::load_balancer::node::{Node, NodeAddr};
use crate::session::store::{Resolution, SessionStore};

/// Immutable node list shared by all readers of one membership generation.
pub type NodeSnapshot = Arc<Vec<Arc<Node>>>;

#[derive(Debug)]
pub struct Cluster {
    name: String,
    nodes: ArcSwap<Vec<Arc<Node>>>,
    sessions: SessionStore,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: ArcSwap::from_pointee(Vec::new()),
            sessions: SessionStore::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Current membership, in registration order.
    pub fn nodes(&self) -> NodeSnapshot {
        self.nodes.load_full()
    }

    /// Current members that are not marked down.
    pub fn available_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .load()
            .iter()
            .filter(|n| !n.is_down())
            .cloned()
            .collect()
    }

    /// The current member with the given identity, if any.
    pub fn member(&self, addr: &NodeAddr) -> Option<Arc<Node>> {
        self.nodes.load().iter().find(|n| n.addr() == addr).cloned()
    }

    /// Atomically replace the membership.
    ///
    /// Addresses already present keep their `Node`; duplicates are dropped.
    pub fn replace_nodes(&self, addrs: impl IntoIterator<Item = NodeAddr>) {
        let addrs: Vec<NodeAddr> = addrs.into_iter().collect();
        self.nodes.rcu(|current| {
            let mut next: Vec<Arc<Node>> = Vec::with_capacity(addrs.len());
            for addr in &addrs {
                if next.iter().any(|n| n.addr() == addr) {
                    continue;
                }
                let node = current
                    .iter()
                    .find(|n| n.addr() == addr)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Node::new(addr.clone())));
                next.push(node);
            }
            next
        });
    }

    /// Add a node unless one with the same identity exists. Returns true if added.
    pub fn add_node(&self, addr: NodeAddr) -> bool {
        let mut added = false;
        self.nodes.rcu(|current| {
            added = !current.iter().any(|n| *n.addr() == addr);
            let mut next = current.as_ref().clone();
            if added {
                next.push(Arc::new(Node::new(addr.clone())));
            }
            next
        });
        added
    }

    /// Remove a node. Sessions bound to it become invalid on next lookup.
    pub fn remove_node(&self, addr: &NodeAddr) -> bool {
        let mut removed = false;
        self.nodes.rcu(|current| {
            let next: Vec<Arc<Node>> = current
                .iter()
                .filter(|n| n.addr() != addr)
                .cloned()
                .collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    /// Resolve a session to a live member node, refreshing it.
    ///
    /// Expired sessions, sessions bound to a down node, and sessions whose node
    /// left the cluster are all misses.
    pub fn session_node(&self, session_id: &str, now: Instant, timeout: Duration) -> Option<Arc<Node>> {
        self.sessions
            .lookup(session_id, now, timeout, |bound| self.usable_member(bound))
    }

    /// Resolve a session like [`Cluster::session_node`], binding the node from
    /// `assign` on a miss without letting a concurrent request bind another.
    pub fn resolve_session<A>(
        &self,
        session_id: &str,
        now: Instant,
        timeout: Duration,
        assign: A,
    ) -> Result<Resolution>
    where
        A: FnOnce() -> Result<Arc<Node>>,
    {
        self.sessions
            .lookup_or_bind(session_id, now, timeout, |bound| self.usable_member(bound), assign)
    }

    fn usable_member(&self, bound: &Arc<Node>) -> Option<Arc<Node>> {
        let member = self.member(bound.addr())?;
        (!member.is_down()).then_some(member)
    }
}
