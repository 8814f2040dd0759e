//! Routing interceptor.
//!
//! # Responsibilities
//! - Decide the destination node for each request (affinity first, then strategy)
//! - Build the ordered destination list used by the transport for failover
//! - Release load counters and bind new sessions when the response arrives
//!
//! # Data Flow
//! ```text
//! transport ──▶ handle_request(&mut Exchange) ──▶ destinations / local 500
//!                                                      │
//! transport ◀── call node(s) ◀─────────────────────────┘
//!     │
//!     └──▶ handle_response(&mut Exchange) ──▶ counters, stats, health, session bind
//! ```

pub mod balancing;
pub mod exchange;

pub use balancing::{DispatchedNode, LoadBalancingInterceptor};
pub use exchange::{Exchange, Message, RequestHead, ResponseHead};

/// Whether the transport should proceed to the destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Call the destinations in order.
    Continue,
    /// A response has been set locally; do not contact any node.
    Abort,
}
