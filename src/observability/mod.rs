//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Balancer, interceptor, transport produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields: cluster, node, session_id, request_id
//! - Metric calls are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
