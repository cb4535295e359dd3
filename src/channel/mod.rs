//! Outbound API channels and demultiplexing.
//!
//! # Data Flow
//! ```text
//! caller → ApiDemux::get_api_channel()
//!     → routing.rs (round-robin / least-in-flight over live channels)
//!     → api.rs (typed facade: serialize, dispatch, decode)
//!     → connection.rs (HTTP client to host:port, tenant metadata headers)
//!     → resilience (retry transient failures with backoff)
//! ```
//!
//! # Design Decisions
//! - Channels are lifecycle components owned by their demux
//! - Readiness is probed on demand rather than by a background checker
//! - Topology changes only ever add or remove whole channels

pub mod api;
pub mod connection;
pub mod demux;
pub mod routing;

pub use api::{wait_until_ready, ApiChannel, RemoteApiChannel, TenantManagementApiChannel};
pub use connection::{
    AsyncHandle, ChannelSettings, ConnectionChannel, ConnectivityState, SyncHandle, TenantMetadata, TransportError,
    TENANT_AUTH_HEADER, TENANT_ID_HEADER,
};
pub use demux::{ApiChannelFactory, ApiDemux, ServiceInstance, TopologyChange, TopologyListener, TopologyUpdate};
pub use routing::{strategy_for, LeastInFlight, RoundRobin, RoutingStrategy};
