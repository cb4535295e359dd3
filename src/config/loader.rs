//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::FleetConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<FleetConfig, ConfigError> {
    let config: FleetConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<FleetConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingKind;
    use crate::tenant::TenantState;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.fleet.pool_width, 5);
        assert_eq!(config.fleet.operation_timeout_secs, 300);
        assert_eq!(config.channels.poll_interval_ms, 2000);
        assert_eq!(config.channels.routing, RoutingKind::RoundRobin);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [server]
            instance_id = "edge-1"
            data_dir = "/var/lib/fleet"

            [fleet]
            pool_width = 8

            [channels]
            routing = "least-in-flight"

            [[peers]]
            service = "device-management"
            hosts = ["dm-0", "dm-1"]
            port = 9100

            [[tenants]]
            id = "acme"
            name = "Acme"
            auth_token = "acme-token"
            desired_state = "stopped"
        "#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.server.instance_id, "edge-1");
        assert_eq!(config.fleet.pool_width, 8);
        assert_eq!(config.channels.routing, RoutingKind::LeastInFlight);
        assert_eq!(config.peers[0].hosts.len(), 2);
        assert_eq!(config.tenants[0].desired_state, TenantState::Stopped);
    }

    #[test]
    fn test_validation_errors_are_reported() {
        let err = parse_config("[fleet]\npool_width = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("pool_width"));
    }
}
