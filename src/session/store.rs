//! Per-cluster session table.
//!
//! # Responsibilities
//! - Map session id → bound node (weak back-reference)
//! - Refresh last-used time on every successful lookup
//! - Evict sessions idle longer than the timeout
//!
//! # Design Decisions
//! - DashMap shards keep writes lock-scoped to one shard
//! - The store never owns nodes; a dropped node makes its sessions invalid
//! - Validity (node down, node removed) is decided by the caller's predicate

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::Result;
use crate::load_balancer::node::Node;

/// A single session binding.
#[derive(Debug, Clone)]
pub struct Session {
    node: Weak<Node>,
    last_used: Instant,
}

impl Session {
    fn new(node: &Arc<Node>, now: Instant) -> Self {
        Self {
            node: Arc::downgrade(node),
            last_used: now,
        }
    }

    /// The bound node, if it is still alive.
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_used) > timeout
    }
}

/// Outcome of [`SessionStore::lookup_or_bind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A usable binding was found and refreshed.
    Reused(Arc<Node>),
    /// A node was assigned; `previous` is the live node the session pointed at before.
    Bound {
        node: Arc<Node>,
        previous: Option<Arc<Node>>,
    },
}

impl Resolution {
    pub fn node(&self) -> &Arc<Node> {
        match self {
            Resolution::Reused(node) | Resolution::Bound { node, .. } => node,
        }
    }
}

/// Session id → node table for one cluster.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session and refresh it.
    ///
    /// `resolve` maps the bound node onto the node that should serve the
    /// request, returning `None` when the binding is no longer usable. An
    /// expired or unusable entry is left in place and reported as a miss.
    pub fn lookup<F>(&self, session_id: &str, now: Instant, timeout: Duration, resolve: F) -> Option<Arc<Node>>
    where
        F: FnOnce(&Arc<Node>) -> Option<Arc<Node>>,
    {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.is_expired(now, timeout) {
            return None;
        }
        let node = resolve(&entry.node()?)?;
        entry.last_used = now;
        Some(node)
    }

    /// Look up a session, or bind the node produced by `assign` when it misses.
    ///
    /// The miss path holds the entry while `assign` runs, so concurrent first
    /// requests for one session id all end up on the same node. `assign` must
    /// not touch this store. An `assign` error leaves the table unchanged.
    pub fn lookup_or_bind<F, A>(
        &self,
        session_id: &str,
        now: Instant,
        timeout: Duration,
        resolve: F,
        assign: A,
    ) -> Result<Resolution>
    where
        F: Fn(&Arc<Node>) -> Option<Arc<Node>>,
        A: FnOnce() -> Result<Arc<Node>>,
    {
        if let Some(node) = self.lookup(session_id, now, timeout, &resolve) {
            return Ok(Resolution::Reused(node));
        }

        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                // Another request may have bound it between the lookup and here.
                if !session.is_expired(now, timeout) {
                    if let Some(node) = session.node().and_then(|n| resolve(&n)) {
                        session.last_used = now;
                        return Ok(Resolution::Reused(node));
                    }
                }
                let previous = session.node();
                let node = assign()?;
                *session = Session::new(&node, now);
                Ok(Resolution::Bound { node, previous })
            }
            Entry::Vacant(entry) => {
                let node = assign()?;
                entry.insert(Session::new(&node, now));
                Ok(Resolution::Bound { node, previous: None })
            }
        }
    }

    /// The node currently bound to a session, without refreshing it.
    pub fn peek(&self, session_id: &str) -> Option<Arc<Node>> {
        self.sessions.get(session_id).and_then(|s| s.node())
    }

    /// Bind a session to a node, replacing any previous binding.
    pub fn bind(&self, session_id: impl Into<String>, node: &Arc<Node>, now: Instant) {
        self.sessions.insert(session_id.into(), Session::new(node, now));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions bound to the given node.
    pub fn count_for(&self, node: &Node) -> usize {
        self.sessions
            .iter()
            .filter(|r| r.value().node().is_some_and(|n| *n == *node))
            .count()
    }

    /// Remove every session idle longer than `timeout` at `now`, or whose node is gone.
    ///
    /// Returns the number of evicted sessions.
    pub fn evict_idle(&self, now: Instant, timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !s.is_expired(now, timeout) && s.node.strong_count() > 0);
        before.saturating_sub(self.sessions.len())
    }
}
