//! Engine state reporting.

use serde::{Deserialize, Serialize};

use crate::lifecycle::{ComponentSnapshot, LifecycleStatus};

/// Reported state of one tenant engine.
///
/// `components` is only present while the engine is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub tenant_id: String,
    pub status: LifecycleStatus,
    pub last_error: Option<String>,
    pub components: Option<Vec<ComponentSnapshot>>,
}

/// Outcome reported for a tenant engine command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResult {
    Successful,
    Failed,
    /// The caller stopped waiting; the command is still queued or running.
    Submitted,
}

impl CommandResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandResult::Successful => "successful",
            CommandResult::Failed => "failed",
            CommandResult::Submitted => "submitted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: CommandResult,
    pub message: String,
}

impl CommandResponse {
    pub fn successful(message: impl Into<String>) -> Self {
        Self {
            result: CommandResult::Successful,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: CommandResult::Failed,
            message: message.into(),
        }
    }

    pub fn submitted() -> Self {
        Self {
            result: CommandResult::Submitted,
            message: "Command submitted.".to_string(),
        }
    }
}
