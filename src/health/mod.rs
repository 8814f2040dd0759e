//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Check every node of every cluster
//!     → node.mark_success / node.mark_failure
//!
//! Passive health checks (interceptor/balancing.rs):
//!     Response phase observes 502/503/504 or a failed primary call
//!     → node.mark_failure
//! ```
//!
//! # Design Decisions
//! - Active and passive checks share the node's hysteresis counters
//! - State transitions require consecutive successes/failures
//! - Health state lives on the node; the session table and strategies read it

pub mod active;

pub use active::{HealthMonitor, MonitorHandle};
