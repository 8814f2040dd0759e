//! HTTP load balancing with session affinity.
//!
//! The core is transport-agnostic: [`load_balancer::Balancer`] owns clusters and
//! their session tables, and [`interceptor::LoadBalancingInterceptor`] turns each
//! request into an ordered destination list. [`http::HttpServer`] is the
//! reference transport that forwards over HTTP.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod session;

pub use config::schema::ProxyConfig;
pub use error::{BalancerError, Result};
pub use http::HttpServer;
pub use interceptor::{Exchange, LoadBalancingInterceptor, Outcome};
pub use lifecycle::Shutdown;
pub use load_balancer::{Balancer, Node, NodeAddr};
