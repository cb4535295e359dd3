//! Server subsystem.
//!
//! # Data Flow
//! ```text
//! main.rs
//!     → orchestrator.rs (root component: global services + tenant engine fleet)
//!     → fleet.rs (bounded-parallel initialize/start/stop/terminate phases)
//!     → identity.rs (persisted node id through the resource resolver)
//!     → runtime.rs (memory/uptime sampler, runtime info)
//! ```

pub mod fleet;
pub mod identity;
pub mod orchestrator;
pub mod runtime;

pub use fleet::{FleetPhase, FleetReport};
pub use identity::{load_or_create_identity, FileResources, ResourceResolver, ServerState};
pub use orchestrator::ServerOrchestrator;
pub use runtime::{RuntimeInfo, RuntimeSample, RuntimeSampler};
