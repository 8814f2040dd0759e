//! By-active-load dispatch strategy.

use std::sync::Arc;

use crate::error::{BalancerError, Result};
use crate::load_balancer::{node::Node, DispatchStrategy};

/// Least in-flight selector.
/// Selects the live node with the fewest requests currently in flight.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl DispatchStrategy for LeastConnections {
    fn dispatch(&self, nodes: &[Arc<Node>]) -> Result<Arc<Node>> {
        // In case of tie, the first one is selected (registration order)
        nodes
            .iter()
            .filter(|n| !n.is_down())
            .min_by_key(|n| n.in_flight())
            .cloned()
            .ok_or(BalancerError::NoAvailableNode)
    }

    fn name(&self) -> &'static str {
        "by_active_load"
    }
}
