//! Backend node abstraction.
//!
//! # Responsibilities
//! - Identify a single backend endpoint by (host, port)
//! - Track dispatch count and in-flight requests (for By-Active-Load)
//! - Track health state (Unknown/Up/Down) with failure hysteresis
//! - Fold completed requests into rolling statistics

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BalancerError, Result};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Up = 1,
    Down = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Up,
            2 => HealthState::Down,
            _ => HealthState::Unknown,
        }
    }
}

/// Network identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check that the address forms a usable `http://` origin.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| BalancerError::InvalidNode {
            host: self.host.clone(),
            port: self.port,
            reason,
        };
        if self.port == 0 {
            return Err(invalid("port must be non-zero".to_string()));
        }
        let url = Url::parse(&format!("http://{}", self.authority()))
            .map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none() || url.path() != "/" {
            return Err(invalid("not a plain host".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Rolling request statistics for a node.
#[derive(Debug, Default)]
pub struct NodeStats {
    requests: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    status_codes: DashMap<u16, u64>,
}

/// Point-in-time copy of [`NodeStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub status_codes: BTreeMap<u16, u64>,
}

impl NodeStats {
    fn record(&self, latency: Duration, status: Option<StatusCode>, failed: bool) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(millis, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(millis, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(status) = status {
            *self.status_codes.entry(status.as_u16()).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> NodeStatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        let avg_latency_ms = if requests == 0 {
            0.0
        } else {
            total_latency_ms as f64 / requests as f64
        };
        NodeStatsSnapshot {
            requests,
            failures: self.failures.load(Ordering::Relaxed),
            total_latency_ms,
            avg_latency_ms,
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            status_codes: self
                .status_codes
                .iter()
                .map(|r| (*r.key(), *r.value()))
                .collect(),
        }
    }
}

/// A single backend node.
///
/// Equality and hashing only consider the address; all other fields are live
/// state shared by every request dispatched to the node.
#[derive(Debug)]
pub struct Node {
    addr: NodeAddr,
    /// Total number of dispatches ever made to this node.
    dispatched: AtomicU64,
    /// Requests dispatched but not yet completed.
    in_flight: AtomicUsize,
    /// Current health state (0=Unknown, 1=Up, 2=Down).
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    stats: NodeStats,
}

impl Node {
    /// Create a new node in the `Unknown` health state.
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            dispatched: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            stats: NodeStats::default(),
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    pub fn host(&self) -> &str {
        &self.addr.host
    }

    pub fn port(&self) -> u16 {
        self.addr.port
    }

    /// Build the destination URL for a path-and-query on this node.
    pub fn destination(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr.authority(), path_and_query)
    }

    // --- Counters ---

    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn increment_dispatch_count(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the in-flight counter, saturating at zero.
    pub fn decrement_in_flight(&self) {
        let result = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if result.is_err() {
            tracing::debug!(node = %self.addr, "In-flight decrement without matching increment");
        }
    }

    // --- Statistics ---

    /// Fold one completed request into the node statistics.
    pub fn record_outcome(&self, latency: Duration, status: Option<StatusCode>, failed: bool) {
        self.stats.record(latency, status, failed);
    }

    pub fn stats(&self) -> NodeStatsSnapshot {
        self.stats.snapshot()
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// True only when the node is explicitly marked down; `Unknown` is live.
    pub fn is_down(&self) -> bool {
        self.health() == HealthState::Down
    }

    pub fn mark_up(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.state.store(HealthState::Up as u8, Ordering::Relaxed);
    }

    pub fn mark_down(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.state.store(HealthState::Down as u8, Ordering::Relaxed);
    }

    /// Report a successful request/check. Returns true on a transition to `Up`.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Up {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Up as u8, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Report a failed request/check. Returns true on a transition to `Down`.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Down {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Down as u8, Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}
