//! Multi-tenant service fleet runtime library

pub mod channel;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod management;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod tenant;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use lifecycle::{LifecycleComponent, LifecycleStatus, Shutdown};
pub use server::ServerOrchestrator;
pub use tenant::TenantEngine;
