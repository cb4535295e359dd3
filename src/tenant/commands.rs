//! Tenant engine command registry and per-engine command queue.
//!
//! # Data Flow
//! ```text
//! issue_command(name, timeout)
//!     → EngineCommand::from_str (InvalidCommand if unknown)
//!     → bounded mpsc queue (one per engine, rejects when full)
//!     → single worker task executes commands one at a time
//!     → oneshot reply; caller waits at most `timeout` for it
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Weak;
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{FleetError, Result};
use crate::observability::metrics;
use crate::tenant::{CommandResponse, TenantEngine};

/// Fixed set of commands a tenant engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCommand {
    Start,
    Stop,
    Restart,
}

impl EngineCommand {
    pub const ALL: [EngineCommand; 3] = [EngineCommand::Start, EngineCommand::Stop, EngineCommand::Restart];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineCommand::Start => "start",
            EngineCommand::Stop => "stop",
            EngineCommand::Restart => "restart",
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineCommand {
    type Err = FleetError;

    fn from_str(name: &str) -> Result<Self> {
        EngineCommand::ALL
            .into_iter()
            .find(|command| command.as_str().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| FleetError::InvalidCommand(name.to_string()))
    }
}

pub(crate) struct CommandRequest {
    pub command: EngineCommand,
    pub respond_to: oneshot::Sender<Result<CommandResponse>>,
}

/// Sending half of an engine's command queue plus the worker draining it.
pub(crate) struct CommandQueue {
    tx: mpsc::Sender<CommandRequest>,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Spawn the worker. It holds only a weak reference, so dropping the engine ends it.
    pub fn spawn(engine: Weak<TenantEngine>, depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let worker = tokio::spawn(run_commands(rx, engine));
        Self { tx, worker }
    }

    /// Enqueue without waiting. A full queue rejects the command outright.
    pub fn submit(&self, tenant_id: &str, command: EngineCommand) -> Result<oneshot::Receiver<Result<CommandResponse>>> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .try_send(CommandRequest { command, respond_to })
            .map_err(|e| match e {
                TrySendError::Full(_) => FleetError::CommandQueueFull(tenant_id.to_string()),
                TrySendError::Closed(_) => FleetError::CommandQueueClosed,
            })?;
        Ok(rx)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_commands(mut rx: mpsc::Receiver<CommandRequest>, engine: Weak<TenantEngine>) {
    while let Some(CommandRequest { command, respond_to }) = rx.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };

        let started = Instant::now();
        let response = engine.execute_command(command).await;
        let result = match &response {
            Ok(response) => response.result.as_str(),
            Err(_) => "error",
        };
        tracing::info!(
            tenant = %engine.tenant_id(),
            command = %command,
            result,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tenant engine command finished"
        );
        metrics::record_command(command.as_str(), result);

        // The caller may have stopped waiting.
        let _ = respond_to.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!("start".parse::<EngineCommand>().unwrap(), EngineCommand::Start);
        assert_eq!(" Restart ".parse::<EngineCommand>().unwrap(), EngineCommand::Restart);

        let err = "reboot".parse::<EngineCommand>().unwrap_err();
        assert!(matches!(err, FleetError::InvalidCommand(name) if name == "reboot"));
    }
}
