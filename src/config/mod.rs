//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FleetConfig (validated, immutable)
//!     → sections handed to the orchestrator, channels and sampler at assembly time
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; lifecycle components never re-read it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ChannelConfig, FleetConfig, FleetSection, MonitoringConfig, ObservabilityConfig, PeerConfig, RetryConfig,
    RoutingKind, ServerSection,
};
