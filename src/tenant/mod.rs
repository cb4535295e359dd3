//! Tenant subsystem.
//!
//! # Data Flow
//! ```text
//! orchestrator creates TenantEngine(tenant)
//!     → initialize: resolve bindings → core functions (base services, management)
//!     → start:      search provider + outbound communication
//!     → commands.rs: external start/stop/restart, one at a time per engine
//!     → state.rs:    status + hierarchy snapshot for diagnosis
//! ```

pub mod commands;
pub mod engine;
pub mod model;
pub mod state;

pub use commands::EngineCommand;
pub use engine::TenantEngine;
pub use model::{Tenant, TenantState, User, ADMINISTER_ALL_TENANTS};
pub use state::{CommandResponse, CommandResult, EngineState};
