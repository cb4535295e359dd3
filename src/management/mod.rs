//! Management backend contracts.
//!
//! # Data Flow
//! ```text
//! assembly code
//!     → bindings.rs (ServerBindings / TenantBindings with typed handles)
//!     → orchestrator / tenant engine validate handles at initialize
//!     → handles driven through the lifecycle like any other component
//! ```
//!
//! # Design Decisions
//! - Backends are capability traits layered on `LifecycleComponent`
//! - Storage-facing operations are out of scope; only what the core calls is modeled
//! - A missing required handle is a configuration error for that initialize only

pub mod bindings;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::lifecycle::{IntoComponent, LifecycleComponent};
use crate::tenant::{Tenant, TenantState, User};

pub use bindings::{ServerBindings, TenantBindingResolver, TenantBindings};

/// Tenant CRUD as consumed by the orchestrator and engines.
#[async_trait]
pub trait TenantManagement: LifecycleComponent + IntoComponent {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>>;

    /// Persist whether the tenant's engine should run after the next boot.
    async fn update_desired_state(&self, id: &str, state: TenantState) -> Result<()>;
}

#[async_trait]
pub trait UserManagement: LifecycleComponent + IntoComponent {
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
}

pub trait DeviceManagement: LifecycleComponent + IntoComponent {}

pub trait DeviceEventManagement: LifecycleComponent + IntoComponent {}

pub trait AssetManagement: LifecycleComponent + IntoComponent {}

pub trait ScheduleManagement: LifecycleComponent + IntoComponent {}

/// Per-tenant outbound delivery (event sources, connectors).
pub trait OutboundCommunication: LifecycleComponent + IntoComponent {}

pub trait SearchProviderManager: LifecycleComponent + IntoComponent {}
