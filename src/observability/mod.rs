//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle transitions, fleet phases, channel calls, commands, sampler
//!     → logging.rs (tracing events with component/tenant/host fields)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric helpers are free functions so call sites stay one line
//! - Without an installed recorder every metric call is a no-op

pub mod logging;
pub mod metrics;
