//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (balancer cluster is declared)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Detect duplicate clusters and nodes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{ProxyConfig, SessionIdConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let balancer = &config.balancer;
    if balancer.session_timeout_ms == 0 {
        errors.push(ValidationError::new("balancer.session_timeout_ms", "must be greater than 0"));
    }
    if balancer.cleanup_interval_ms == 0 {
        errors.push(ValidationError::new("balancer.cleanup_interval_ms", "must be greater than 0"));
    }
    match &balancer.session_id {
        Some(SessionIdConfig::Cookie { name } | SessionIdConfig::Header { name }) if name.trim().is_empty() => {
            errors.push(ValidationError::new("balancer.session_id.name", "must not be empty"));
        }
        Some(SessionIdConfig::XmlElement { local_name, .. }) if local_name.trim().is_empty() => {
            errors.push(ValidationError::new("balancer.session_id.local_name", "must not be empty"));
        }
        _ => {}
    }

    let mut cluster_names = HashSet::new();
    for (i, cluster) in config.clusters.iter().enumerate() {
        if cluster.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("clusters[{}].name", i), "must not be empty"));
        }
        if !cluster_names.insert(cluster.name.as_str()) {
            errors.push(ValidationError::new(
                format!("clusters[{}].name", i),
                format!("duplicate cluster '{}'", cluster.name),
            ));
        }

        let mut seen = HashSet::new();
        for (j, node) in cluster.nodes.iter().enumerate() {
            let field = format!("clusters[{}].nodes[{}]", i, j);
            if let Err(e) = node.validate() {
                errors.push(ValidationError::new(field.clone(), e.to_string()));
            }
            if !seen.insert(node) {
                errors.push(ValidationError::new(field, format!("duplicate node {}", node)));
            }
        }
    }

    if !config.clusters.is_empty() && !cluster_names.contains(balancer.cluster.as_str()) {
        errors.push(ValidationError::new(
            "balancer.cluster",
            format!("cluster '{}' is not declared", balancer.cluster),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let health = &config.health_check;
    if health.enabled && (health.interval_secs == 0 || health.timeout_secs == 0) {
        errors.push(ValidationError::new("health_check", "interval and timeout must be greater than 0"));
    }
    if health.unhealthy_threshold == 0 || health.healthy_threshold == 0 {
        errors.push(ValidationError::new("health_check", "thresholds must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
