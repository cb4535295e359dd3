//! Persistent server identity and resource access.
//!
//! The node id is generated on first boot and stored through the resource resolver;
//! every later boot against the same store reuses it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FleetError, Result};

const SERVER_STATE_FILE: &str = "server-state.json";

/// Identity persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub node_id: Uuid,
    pub created: DateTime<Utc>,
}

impl ServerState {
    fn generate() -> Self {
        Self {
            node_id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }
}

/// Access to persisted server identity and configuration content.
///
/// Consulted only while the orchestrator initializes.
pub trait ResourceResolver: Send + Sync {
    /// Open access to bootstrap resources (identity, global settings).
    fn start_bootstrap(&self) -> Result<()>;

    /// Open access to runtime resources once global services are configured.
    fn start_runtime(&self) -> Result<()>;

    fn load_server_state(&self) -> Result<Option<ServerState>>;

    fn store_server_state(&self, state: &ServerState) -> Result<()>;
}

/// Resources stored as files under a data directory.
#[derive(Debug, Clone)]
pub struct FileResources {
    root: PathBuf,
}

impl FileResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(SERVER_STATE_FILE)
    }
}

impl ResourceResolver for FileResources {
    fn start_bootstrap(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .map_err(|e| FleetError::Resource(format!("unable to create {}: {e}", self.root.display())))?;
        tracing::debug!(root = %self.root.display(), "Bootstrap resources available");
        Ok(())
    }

    fn start_runtime(&self) -> Result<()> {
        let tenants = self.root.join("tenants");
        fs::create_dir_all(&tenants)
            .map_err(|e| FleetError::Resource(format!("unable to create {}: {e}", tenants.display())))?;
        Ok(())
    }

    fn load_server_state(&self) -> Result<Option<ServerState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| FleetError::Resource(format!("unable to read {}: {e}", path.display())))?;
        let state = serde_json::from_str(&content)
            .map_err(|e| FleetError::Resource(format!("invalid server state in {}: {e}", path.display())))?;
        Ok(Some(state))
    }

    fn store_server_state(&self, state: &ServerState) -> Result<()> {
        let path = self.state_path();
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| FleetError::Resource(format!("unable to encode server state: {e}")))?;
        fs::write(&path, content)
            .map_err(|e| FleetError::Resource(format!("unable to write {}: {e}", path.display())))
    }
}

/// Load the persisted identity, generating and storing one on first boot.
pub fn load_or_create_identity(resolver: &dyn ResourceResolver) -> Result<ServerState> {
    if let Some(state) = resolver.load_server_state()? {
        tracing::info!(node_id = %state.node_id, "Loaded persisted server state");
        return Ok(state);
    }

    let state = ServerState::generate();
    resolver.store_server_state(&state)?;
    tracing::info!(node_id = %state.node_id, "No server state found, generated new node id");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_boot_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let resources = FileResources::new(dir.path());
        resources.start_bootstrap().unwrap();

        assert!(resources.load_server_state().unwrap().is_none());
        let state = load_or_create_identity(&resources).unwrap();
        assert_eq!(resources.load_server_state().unwrap(), Some(state));
    }

    #[test]
    fn test_second_boot_reuses_node_id() {
        let dir = tempfile::tempdir().unwrap();

        let first = {
            let resources = FileResources::new(dir.path());
            resources.start_bootstrap().unwrap();
            load_or_create_identity(&resources).unwrap()
        };
        let second = {
            let resources = FileResources::new(dir.path());
            resources.start_bootstrap().unwrap();
            load_or_create_identity(&resources).unwrap()
        };

        assert_eq!(first.node_id, second.node_id);
        assert_eq!(first.created, second.created);
    }

    #[test]
    fn test_corrupt_state_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_STATE_FILE), "not json").unwrap();

        let err = load_or_create_identity(&FileResources::new(dir.path())).unwrap_err();
        assert!(matches!(err, FleetError::Resource(_)));
    }
}
