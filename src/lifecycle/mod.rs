//! Lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! owner builds CompositeStep
//!     → step.rs (ordered execution, critical/non-critical rules)
//!     → component.rs (transition driver: Stopped → Initializing → ... → Terminated)
//!     → monitor.rs (one progress tick per leaf step)
//!
//! Process shutdown (signals.rs):
//!     SIGTERM/SIGINT → orchestrator stop → terminate
//! ```
//!
//! # Design Decisions
//! - Every managed unit embeds one `ComponentCore`; behavior lives in `on_*` hooks
//! - Failures inside hooks become status, never unwinding past the driver
//! - Children index is rebuilt by each successful start

pub mod component;
pub mod monitor;
pub mod shutdown;
pub mod signals;
pub mod status;
pub mod step;

pub use component::{drive, ComponentCore, ComponentId, ComponentSnapshot, IntoComponent, LifecycleComponent, Transition};
pub use monitor::ProgressMonitor;
pub use shutdown::Shutdown;
pub use status::{ComponentKind, LifecycleStatus};
pub use step::{start_nested, stop_best_effort, CompositeStep, LifecycleStep};
