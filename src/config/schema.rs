//! Configuration schema definitions.
//!
//! Every section derives Serde traits and falls back to defaults, so an empty file
//! (or no file at all) yields a runnable standalone node.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tenant::{Tenant, User};

/// Root configuration for a tenant-fleet node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Node identity and on-disk state.
    pub server: ServerSection,

    /// Bounded-parallel tenant phases and engine command queues.
    pub fleet: FleetSection,

    /// Periodic self-monitoring.
    pub monitoring: MonitoringConfig,

    /// Outbound API channel settings shared by every peer.
    pub channels: ChannelConfig,

    /// Peer services reached through API demultiplexers.
    pub peers: Vec<PeerConfig>,

    /// Tenants seeded into the in-process tenant backend.
    pub tenants: Vec<Tenant>,

    /// Users seeded into the in-process user backend.
    pub users: Vec<User>,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Logical instance name reported in runtime info.
    pub instance_id: String,

    /// Directory holding persisted server state and tenant resources.
    pub data_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            instance_id: "tenant-fleet".to_string(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetSection {
    /// Concurrent tenant operations per phase.
    pub pool_width: usize,

    /// How long a fleet phase waits before it stops waiting.
    pub operation_timeout_secs: u64,

    /// Pending commands per tenant engine.
    pub command_queue_depth: usize,

    /// Default wait applied to commands issued without an explicit timeout.
    pub command_timeout_secs: u64,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            pool_width: 5,
            operation_timeout_secs: 300,
            command_queue_depth: 32,
            command_timeout_secs: 30,
        }
    }
}

impl FleetSection {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub sample_interval_secs: u64,
    /// Samples retained for historical runtime info.
    pub history_size: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_secs: 10,
            history_size: 360,
        }
    }
}

/// Channel selection policy for a demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingKind {
    #[default]
    RoundRobin,
    LeastInFlight,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Default peer port when a peer entry does not set one.
    pub port: u16,

    /// Readiness poll interval used by `wait_for_api_available`.
    pub poll_interval_ms: u64,

    pub connect_timeout_ms: u64,

    pub request_timeout_ms: u64,

    pub routing: RoutingKind,

    pub retries: RetryConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            poll_interval_ms: 2000,
            connect_timeout_ms: 5000,
            request_timeout_ms: 30_000,
            routing: RoutingKind::RoundRobin,
            retries: RetryConfig::default(),
        }
    }
}

/// Retry configuration for remote calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

/// One logical peer service and its known replicas.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfig {
    /// Target service identifier (e.g. "device-management").
    pub service: String,

    /// Replica hostnames.
    pub hosts: Vec<String>,

    pub port: Option<u16>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
