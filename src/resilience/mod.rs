//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call on an API channel:
//!     → retries.rs (transient? retry up to max_attempts)
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Every remote call already carries a request timeout from the channel client
//! - Jittered backoff prevents replicas being hit in lockstep

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::RetryPolicy;
