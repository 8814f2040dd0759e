//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → applied to Balancer + interceptor at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent to the server, which applies it through the
//!       interceptor's mutation operations (strategy, extractor,
//!       timeout, failover, node lists)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid reload is logged and ignored; the running config stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, BalancerConfig, ClusterConfig, FailoverConfig, HealthCheckConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, RetryConfig, SessionIdConfig,
    StrategyKind, TimeoutConfig,
};
