//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::node::NodeAddr;

/// Root configuration for the balancing proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Balancer settings (strategy, sessions, failover).
    pub balancer: BalancerConfig,

    /// Cluster definitions.
    pub clusters: Vec<ClusterConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Backoff between failover attempts.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body buffered for failover, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Dispatch strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    ByActiveLoad,
}

/// Where to find the session id, if affinity is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionIdConfig {
    Cookie {
        #[serde(default = "default_cookie_name")]
        name: String,
    },
    Header {
        name: String,
    },
    /// Text of the first element named `local_name` in an XML request body.
    XmlElement {
        local_name: String,
        /// Namespace URI the element must be bound to; any when absent.
        #[serde(default)]
        namespace: Option<String>,
    },
}

fn default_cookie_name() -> String {
    crate::session::extractor::JSESSIONID.to_string()
}

/// Failover destination settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Offer the other cluster nodes as failover destinations.
    pub enabled: bool,

    /// Also offer nodes currently marked down.
    pub include_down: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_down: false,
        }
    }
}

/// Balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Balancer name (for logging and the admin API).
    pub name: String,

    /// Cluster the proxy dispatches to.
    pub cluster: String,

    pub strategy: StrategyKind,

    /// Idle time after which a session is evicted, in milliseconds.
    pub session_timeout_ms: u64,

    /// Interval between session cleanup passes, in milliseconds.
    pub cleanup_interval_ms: u64,

    pub failover: FailoverConfig,

    /// Session affinity; disabled when absent.
    pub session_id: Option<SessionIdConfig>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            cluster: crate::load_balancer::DEFAULT_CLUSTER.to_string(),
            strategy: StrategyKind::RoundRobin,
            session_timeout_ms: crate::load_balancer::balancer::DEFAULT_SESSION_TIMEOUT.as_millis() as u64,
            cleanup_interval_ms: crate::session::cleanup::DEFAULT_CLEANUP_INTERVAL.as_millis() as u64,
            failover: FailoverConfig::default(),
            session_id: None,
        }
    }
}

/// A named cluster of nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Unique cluster name.
    pub name: String,

    /// Nodes in registration order.
    #[serde(default)]
    pub nodes: Vec<NodeAddr>,
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path requested by HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking down.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking up.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Timeout configuration for calls to nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Per-attempt request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Backoff between attempts across the destination list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the read-only admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.balancer.cluster, "Default");
        assert_eq!(config.balancer.strategy, StrategyKind::RoundRobin);
        assert_eq!(config.balancer.session_timeout_ms, 3_600_000);
        assert!(config.balancer.failover.enabled);
        assert!(config.balancer.session_id.is_none());
    }

    #[test]
    fn test_full_balancer_section() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [balancer]
            strategy = "by_active_load"
            session_timeout_ms = 5000
            session_id = { type = "cookie" }

            [balancer.failover]
            include_down = true

            [[clusters]]
            name = "Default"
            nodes = [{ host = "10.0.0.1", port = 80 }, { host = "10.0.0.2", port = 81 }]
            "#,
        )
        .unwrap();

        assert_eq!(config.balancer.strategy, StrategyKind::ByActiveLoad);
        assert_eq!(config.balancer.session_timeout_ms, 5000);
        assert_eq!(
            config.balancer.session_id,
            Some(SessionIdConfig::Cookie {
                name: "JSESSIONID".into()
            })
        );
        assert!(config.balancer.failover.enabled);
        assert!(config.balancer.failover.include_down);
        assert_eq!(config.clusters[0].nodes[1], NodeAddr::new("10.0.0.2", 81));
    }

    #[test]
    fn test_header_session_id() {
        let config: BalancerConfig = toml::from_str(
            r#"session_id = { type = "header", name = "X-Session" }"#,
        )
        .unwrap();
        assert_eq!(
            config.session_id,
            Some(SessionIdConfig::Header {
                name: "X-Session".into()
            })
        );
    }

    #[test]
    fn test_xml_element_session_id() {
        let config: BalancerConfig = toml::from_str(
            r#"session_id = { type = "xml_element", local_name = "session", namespace = "urn:shop" }"#,
        )
        .unwrap();
        assert_eq!(
            config.session_id,
            Some(SessionIdConfig::XmlElement {
                local_name: "session".into(),
                namespace: Some("urn:shop".into()),
            })
        );

        let config: BalancerConfig =
            toml::from_str(r#"session_id = { type = "xml_element", local_name = "sid" }"#).unwrap();
        assert!(matches!(
            config.session_id,
            Some(SessionIdConfig::XmlElement { namespace: None, .. })
        ));
    }
}
