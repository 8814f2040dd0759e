//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request for cluster "Default"
//!     → balancer.rs (look up cluster, session affinity)
//!     → cluster.rs (node snapshot, session table)
//!     → Apply dispatch strategy:
//!         - round_robin.rs (rotate through live nodes)
//!         - least_conn.rs (pick node with fewest in-flight requests)
//!     → node.rs (counters, health, statistics)
//!     → Return node or NoAvailableNode
//! ```
//!
//! # Design Decisions
//! - Strategies are pure selection over a node slice; nodes carry the load state
//! - Down nodes are excluded by the strategy; Unknown counts as live
//! - Strategy choice is a closed enum selected by configuration

use std::fmt;
use std::sync::Arc;

use crate::config::StrategyKind;
use crate::error::Result;

pub mod balancer;
pub mod cluster;
pub mod least_conn;
pub mod node;
pub mod round_robin;

pub use balancer::{Balancer, DEFAULT_CLUSTER};
pub use node::{Node, NodeAddr};

use least_conn::LeastConnections;
use round_robin::RoundRobin;

/// Selection policy over a set of candidate nodes.
pub trait DispatchStrategy: Send + Sync + fmt::Debug {
    /// Pick one live node, or fail with `NoAvailableNode`.
    fn dispatch(&self, nodes: &[Arc<Node>]) -> Result<Arc<Node>>;

    fn name(&self) -> &'static str;
}

/// The configured strategy.
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    ByActiveLoad(LeastConnections),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RoundRobin(_) => StrategyKind::RoundRobin,
            Strategy::ByActiveLoad(_) => StrategyKind::ByActiveLoad,
        }
    }
}

impl From<StrategyKind> for Strategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::RoundRobin => Strategy::RoundRobin(RoundRobin::new()),
            StrategyKind::ByActiveLoad => Strategy::ByActiveLoad(LeastConnections::new()),
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::from(StrategyKind::default())
    }
}

impl DispatchStrategy for Strategy {
    fn dispatch(&self, nodes: &[Arc<Node>]) -> Result<Arc<Node>> {
        match self {
            Strategy::RoundRobin(s) => s.dispatch(nodes),
            Strategy::ByActiveLoad(s) => s.dispatch(nodes),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin(s) => s.name(),
            Strategy::ByActiveLoad(s) => s.name(),
        }
    }
}
