//! Typed collaborator handles supplied by the surrounding assembly.

use std::sync::Arc;

use crate::error::{FleetError, Result};
use crate::lifecycle::LifecycleComponent;
use crate::management::{
    AssetManagement, DeviceEventManagement, DeviceManagement, OutboundCommunication, ScheduleManagement,
    SearchProviderManager, TenantManagement, UserManagement,
};
use crate::tenant::Tenant;

fn not_configured(what: &str) -> FleetError {
    FleetError::configuration(format!("No {what} implementation configured."))
}

/// Global collaborators owned by the orchestrator.
#[derive(Clone, Default)]
pub struct ServerBindings {
    /// Base services started before management backends, in this order.
    pub auxiliary: Vec<Arc<dyn LifecycleComponent>>,
    pub tenant_management: Option<Arc<dyn TenantManagement>>,
    pub user_management: Option<Arc<dyn UserManagement>>,
    /// Produces per-tenant handles for each engine.
    pub tenant_bindings: Option<Arc<dyn TenantBindingResolver>>,
}

impl ServerBindings {
    pub fn tenant_management(&self) -> Result<Arc<dyn TenantManagement>> {
        self.tenant_management.clone().ok_or_else(|| not_configured("tenant management"))
    }

    pub fn user_management(&self) -> Result<Arc<dyn UserManagement>> {
        self.user_management.clone().ok_or_else(|| not_configured("user management"))
    }

    pub fn tenant_bindings(&self) -> Result<Arc<dyn TenantBindingResolver>> {
        self.tenant_bindings.clone().ok_or_else(|| not_configured("tenant binding resolver"))
    }

    /// Fail on the first missing required handle.
    pub fn validate(&self) -> Result<()> {
        self.tenant_management()?;
        self.user_management()?;
        self.tenant_bindings()?;
        Ok(())
    }
}

/// Collaborators scoped to one tenant engine.
#[derive(Clone, Default)]
pub struct TenantBindings {
    /// Tenant-scoped base services, started before management implementations.
    pub auxiliary: Vec<Arc<dyn LifecycleComponent>>,
    pub outbound_communication: Option<Arc<dyn OutboundCommunication>>,
    pub device_management: Option<Arc<dyn DeviceManagement>>,
    pub event_management: Option<Arc<dyn DeviceEventManagement>>,
    pub asset_management: Option<Arc<dyn AssetManagement>>,
    pub schedule_management: Option<Arc<dyn ScheduleManagement>>,
    /// Optional; engines fall back to a default manager.
    pub search_provider_manager: Option<Arc<dyn SearchProviderManager>>,
}

impl TenantBindings {
    pub fn outbound_communication(&self) -> Result<Arc<dyn OutboundCommunication>> {
        self.outbound_communication.clone().ok_or_else(|| not_configured("outbound communication"))
    }

    pub fn device_management(&self) -> Result<Arc<dyn DeviceManagement>> {
        self.device_management.clone().ok_or_else(|| not_configured("device management"))
    }

    pub fn event_management(&self) -> Result<Arc<dyn DeviceEventManagement>> {
        self.event_management.clone().ok_or_else(|| not_configured("device event management"))
    }

    pub fn asset_management(&self) -> Result<Arc<dyn AssetManagement>> {
        self.asset_management.clone().ok_or_else(|| not_configured("asset management"))
    }

    pub fn schedule_management(&self) -> Result<Arc<dyn ScheduleManagement>> {
        self.schedule_management.clone().ok_or_else(|| not_configured("schedule management"))
    }
}

/// Builds the per-tenant handles when an engine initializes.
pub trait TenantBindingResolver: Send + Sync {
    fn resolve(&self, tenant: &Tenant) -> Result<TenantBindings>;
}

impl<F> TenantBindingResolver for F
where
    F: Fn(&Tenant) -> Result<TenantBindings> + Send + Sync,
{
    fn resolve(&self, tenant: &Tenant) -> Result<TenantBindings> {
        self(tenant)
    }
}
