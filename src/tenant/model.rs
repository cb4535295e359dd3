//! Tenant and user records as seen by the core.

use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleStatus;

/// Authority granting visibility of every tenant.
pub const ADMINISTER_ALL_TENANTS: &str = "administer-all-tenants";

/// Persisted intent for a tenant's engine across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    #[default]
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub auth_token: String,
    #[serde(default)]
    pub authorized_user_ids: Vec<String>,
    #[serde(default)]
    pub desired_state: TenantState,
    #[serde(default)]
    pub last_known_state: Option<LifecycleStatus>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            auth_token: auth_token.into(),
            authorized_user_ids: Vec::new(),
            desired_state: TenantState::Started,
            last_known_state: None,
        }
    }

    pub fn with_desired_state(mut self, state: TenantState) -> Self {
        self.desired_state = state;
        self
    }

    pub fn with_authorized_user(mut self, user_id: impl Into<String>) -> Self {
        self.authorized_user_ids.push(user_id.into());
        self
    }

    pub fn is_authorized(&self, user: &User) -> bool {
        user.has_authority(ADMINISTER_ALL_TENANTS) || self.authorized_user_ids.iter().any(|id| *id == user.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            authorities: Vec::new(),
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}
