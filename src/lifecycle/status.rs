//! Lifecycle status and component classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a component.
///
/// Stored in an `AtomicU8` inside [`ComponentCore`](super::ComponentCore), hence the
/// explicit discriminants.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Stopped = 0,
    Initializing = 1,
    InitializationError = 2,
    Starting = 3,
    Started = 4,
    LifecycleError = 5,
    Stopping = 6,
    Terminating = 7,
    Terminated = 8,
}

impl From<u8> for LifecycleStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => LifecycleStatus::Initializing,
            2 => LifecycleStatus::InitializationError,
            3 => LifecycleStatus::Starting,
            4 => LifecycleStatus::Started,
            5 => LifecycleStatus::LifecycleError,
            6 => LifecycleStatus::Stopping,
            7 => LifecycleStatus::Terminating,
            8 => LifecycleStatus::Terminated,
            _ => LifecycleStatus::Stopped,
        }
    }
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Stopped => "stopped",
            LifecycleStatus::Initializing => "initializing",
            LifecycleStatus::InitializationError => "initialization-error",
            LifecycleStatus::Starting => "starting",
            LifecycleStatus::Started => "started",
            LifecycleStatus::LifecycleError => "lifecycle-error",
            LifecycleStatus::Stopping => "stopping",
            LifecycleStatus::Terminating => "terminating",
            LifecycleStatus::Terminated => "terminated",
        }
    }

    /// True while a transition is executing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Initializing
                | LifecycleStatus::Starting
                | LifecycleStatus::Stopping
                | LifecycleStatus::Terminating
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::InitializationError | LifecycleStatus::LifecycleError
        )
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification used in hierarchy snapshots and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    System,
    TenantEngine,
    Management,
    OutboundCommunication,
    SearchProvider,
    ApiDemux,
    Channel,
    Auxiliary,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::System => "system",
            ComponentKind::TenantEngine => "tenant-engine",
            ComponentKind::Management => "management",
            ComponentKind::OutboundCommunication => "outbound-communication",
            ComponentKind::SearchProvider => "search-provider",
            ComponentKind::ApiDemux => "api-demux",
            ComponentKind::Channel => "channel",
            ComponentKind::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
