//! Round-robin dispatch strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{BalancerError, Result};
use crate::load_balancer::{node::Node, DispatchStrategy};

/// Round-robin selector.
/// Stores a shared counter to rotate through the live nodes.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchStrategy for RoundRobin {
    fn dispatch(&self, nodes: &[Arc<Node>]) -> Result<Arc<Node>> {
        let live = nodes.iter().filter(|n| !n.is_down()).count();
        if live == 0 {
            return Err(BalancerError::NoAvailableNode);
        }

        // Modulo the current live count; the list may have changed since the last call.
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % live;
        nodes
            .iter()
            .filter(|n| !n.is_down())
            .nth(index)
            // A node flipped down between the two passes.
            .or_else(|| nodes.iter().find(|n| !n.is_down()))
            .cloned()
            .ok_or(BalancerError::NoAvailableNode)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
