//! Resilience helpers for the forwarding path.
//!
//! # Data Flow
//! ```text
//! Attempt against a destination fails (connect error, timeout, 502/503/504)
//!     → backoff.rs (delay before the next destination)
//!     → next destination in the failover list
//! ```

pub mod backoff;
