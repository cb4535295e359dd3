//! Configuration validation.
//!
//! Semantic checks only; serde already rejected malformed input. All problems are
//! collected so one run reports everything.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::FleetConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
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
pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.instance_id.trim().is_empty() {
        errors.push(ValidationError::new("server.instance_id", "must not be empty"));
    }

    if config.fleet.pool_width == 0 {
        errors.push(ValidationError::new("fleet.pool_width", "must be greater than zero"));
    }
    if config.fleet.operation_timeout_secs == 0 {
        errors.push(ValidationError::new("fleet.operation_timeout_secs", "must be greater than zero"));
    }
    if config.fleet.command_queue_depth == 0 {
        errors.push(ValidationError::new("fleet.command_queue_depth", "must be greater than zero"));
    }

    if config.monitoring.enabled {
        if config.monitoring.sample_interval_secs == 0 {
            errors.push(ValidationError::new("monitoring.sample_interval_secs", "must be greater than zero"));
        }
        if config.monitoring.history_size == 0 {
            errors.push(ValidationError::new("monitoring.history_size", "must be greater than zero"));
        }
    }

    if config.channels.poll_interval_ms == 0 {
        errors.push(ValidationError::new("channels.poll_interval_ms", "must be greater than zero"));
    }
    if config.channels.retries.enabled && config.channels.retries.max_attempts == 0 {
        errors.push(ValidationError::new("channels.retries.max_attempts", "must be at least 1"));
    }

    let mut services = HashSet::new();
    for (i, peer) in config.peers.iter().enumerate() {
        if peer.service.trim().is_empty() {
            errors.push(ValidationError::new(format!("peers[{i}].service"), "must not be empty"));
        } else if !services.insert(peer.service.as_str()) {
            errors.push(ValidationError::new(format!("peers[{i}].service"), format!("duplicate service '{}'", peer.service)));
        }
        if peer.hosts.iter().any(|h| h.trim().is_empty()) {
            errors.push(ValidationError::new(format!("peers[{i}].hosts"), "hostnames must not be empty"));
        }
    }

    let mut ids = HashSet::new();
    let mut tokens = HashSet::new();
    for (i, tenant) in config.tenants.iter().enumerate() {
        if tenant.id.trim().is_empty() {
            errors.push(ValidationError::new(format!("tenants[{i}].id"), "must not be empty"));
        } else if !ids.insert(tenant.id.as_str()) {
            errors.push(ValidationError::new(format!("tenants[{i}].id"), format!("duplicate tenant id '{}'", tenant.id)));
        }
        if tenant.auth_token.is_empty() {
            errors.push(ValidationError::new(format!("tenants[{i}].auth_token"), "must not be empty"));
        } else if !tokens.insert(tenant.auth_token.as_str()) {
            errors.push(ValidationError::new(format!("tenants[{i}].auth_token"), "duplicate auth token"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::tenant::Tenant;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = FleetConfig::default();
        config.fleet.pool_width = 0;
        config.channels.poll_interval_ms = 0;
        config.peers.push(PeerConfig {
            service: String::new(),
            hosts: vec!["".into()],
            port: None,
        });
        config.tenants.push(Tenant::new("t1", "One", "same"));
        config.tenants.push(Tenant::new("t1", "Again", "same"));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "fleet.pool_width",
                "channels.poll_interval_ms",
                "peers[0].service",
                "peers[0].hosts",
                "tenants[1].id",
                "tenants[1].auth_token",
            ]
        );
    }
}
