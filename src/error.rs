//! Error taxonomy shared by every subsystem.

use std::sync::Arc;

use crate::lifecycle::LifecycleStatus;

/// Boxed transport or serialization cause carried by [`FleetError::RemoteCallFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Crate-wide result alias.
pub type Result<T, E = FleetError> = std::result::Result<T, E>;

/// Errors raised by lifecycle components, channels and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// A required binding or setting is missing. Fatal to the initialize call that hit it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Re-entrant start/stop misuse.
    #[error("component '{component}' is already {status}")]
    AlreadyInState {
        component: String,
        status: LifecycleStatus,
    },

    #[error("cannot {operation} component '{component}' while it is {status}")]
    IllegalTransition {
        component: String,
        operation: &'static str,
        status: LifecycleStatus,
    },

    /// A channel never reached Ready within the allowed time.
    #[error("API '{target}' not available: {reason}")]
    ApiNotAvailable { target: String, reason: String },

    #[error("no API channels available for '{0}'")]
    NoChannelsAvailable(String),

    #[error("invalid tenant engine command '{0}'")]
    InvalidCommand(String),

    #[error("remote call '{method}' failed: {source}")]
    RemoteCallFailure {
        method: String,
        #[source]
        source: BoxError,
    },

    /// A critical step failed and aborted its composite.
    #[error("{message}: component '{component}' failed")]
    ComponentFailure {
        component: String,
        message: String,
        #[source]
        source: Option<Arc<FleetError>>,
    },

    #[error("tenant engine command queue is closed")]
    CommandQueueClosed,

    /// The engine's command queue is at capacity; the command was not accepted.
    #[error("command queue for tenant '{0}' is full")]
    CommandQueueFull(String),

    #[error("resource error: {0}")]
    Resource(String),

    /// A lifecycle hook panicked.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FleetError {
    pub fn configuration(message: impl Into<String>) -> Self {
        FleetError::Configuration(message.into())
    }

    pub fn remote(method: impl Into<String>, source: impl Into<BoxError>) -> Self {
        FleetError::RemoteCallFailure {
            method: method.into(),
            source: source.into(),
        }
    }

    /// True for the re-entrant misuse case callers usually downgrade to a log line.
    pub fn is_already_in_state(&self) -> bool {
        matches!(self, FleetError::AlreadyInState { .. })
    }
}
