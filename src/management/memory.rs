//! In-process management backends.
//!
//! Used by the standalone daemon (seeded from config) and by tests. They hold
//! everything in memory and carry no behavior beyond what the core consumes.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{FleetError, Result};
use crate::lifecycle::{ComponentCore, ComponentKind, LifecycleComponent};
use crate::management::{
    AssetManagement, DeviceEventManagement, DeviceManagement, OutboundCommunication, ScheduleManagement,
    SearchProviderManager, TenantBindingResolver, TenantBindings, TenantManagement, UserManagement,
};
use crate::tenant::{Tenant, TenantState, User};

/// Tenant records keyed by id, in insertion order.
pub struct MemoryTenantManagement {
    core: Arc<ComponentCore>,
    tenants: RwLock<IndexMap<String, Tenant>>,
}

impl MemoryTenantManagement {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Arc<Self> {
        Arc::new(Self {
            core: ComponentCore::shared("Tenant Management", ComponentKind::Management),
            tenants: RwLock::new(tenants.into_iter().map(|t| (t.id.clone(), t)).collect()),
        })
    }

    /// Insert or replace a tenant. Returns the previous record.
    pub fn upsert(&self, tenant: Tenant) -> Option<Tenant> {
        self.tenants.write().insert(tenant.id.clone(), tenant)
    }

    pub fn remove(&self, id: &str) -> Option<Tenant> {
        self.tenants.write().shift_remove(id)
    }
}

#[async_trait]
impl LifecycleComponent for MemoryTenantManagement {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }
}

#[async_trait]
impl TenantManagement for MemoryTenantManagement {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.read().values().cloned().collect())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn update_desired_state(&self, id: &str, state: TenantState) -> Result<()> {
        match self.tenants.write().get_mut(id) {
            Some(tenant) => {
                tenant.desired_state = state;
                Ok(())
            }
            None => Err(FleetError::Resource(format!("unknown tenant '{id}'"))),
        }
    }
}

pub struct MemoryUserManagement {
    core: Arc<ComponentCore>,
    users: RwLock<IndexMap<String, User>>,
}

impl MemoryUserManagement {
    pub fn new(users: impl IntoIterator<Item = User>) -> Arc<Self> {
        Arc::new(Self {
            core: ComponentCore::shared("User Management", ComponentKind::Management),
            users: RwLock::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
        })
    }

    pub fn upsert(&self, user: User) -> Option<User> {
        self.users.write().insert(user.id.clone(), user)
    }
}

#[async_trait]
impl LifecycleComponent for MemoryUserManagement {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }
}

#[async_trait]
impl UserManagement for MemoryUserManagement {
    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().get(id).cloned())
    }
}

/// Stateless service that satisfies any tenant-scoped capability.
pub struct LocalService {
    core: Arc<ComponentCore>,
}

impl LocalService {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Arc<Self> {
        Arc::new(Self {
            core: ComponentCore::shared(name, kind),
        })
    }

    /// Search provider manager used when a tenant does not bind one.
    pub fn default_search_provider() -> Arc<Self> {
        Self::new("Search Provider Manager", ComponentKind::SearchProvider)
    }
}

#[async_trait]
impl LifecycleComponent for LocalService {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }
}

impl DeviceManagement for LocalService {}
impl DeviceEventManagement for LocalService {}
impl AssetManagement for LocalService {}
impl ScheduleManagement for LocalService {}
impl OutboundCommunication for LocalService {}
impl SearchProviderManager for LocalService {}

/// Resolver handing every tenant a fresh set of [`LocalService`] backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTenantBindings;

impl TenantBindingResolver for LocalTenantBindings {
    fn resolve(&self, tenant: &Tenant) -> Result<TenantBindings> {
        let named = |what: &str| format!("{what} ({})", tenant.id);
        Ok(TenantBindings {
            auxiliary: Vec::new(),
            outbound_communication: Some(LocalService::new(
                named("Outbound Communication"),
                ComponentKind::OutboundCommunication,
            )),
            device_management: Some(LocalService::new(named("Device Management"), ComponentKind::Management)),
            event_management: Some(LocalService::new(named("Device Event Management"), ComponentKind::Management)),
            asset_management: Some(LocalService::new(named("Asset Management"), ComponentKind::Management)),
            schedule_management: Some(LocalService::new(named("Schedule Management"), ComponentKind::Management)),
            search_provider_manager: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_desired_state_is_persisted() {
        let tenants = MemoryTenantManagement::new([Tenant::new("t1", "One", "tok-1")]);
        tenants.update_desired_state("t1", TenantState::Stopped).await.unwrap();

        let tenant = tenants.get_tenant("t1").await.unwrap().unwrap();
        assert_eq!(tenant.desired_state, TenantState::Stopped);
        assert!(tenants.update_desired_state("missing", TenantState::Started).await.is_err());
    }

    #[test]
    fn test_local_bindings_cover_required_handles() {
        let bindings = LocalTenantBindings.resolve(&Tenant::new("t1", "One", "tok")).unwrap();
        assert!(bindings.outbound_communication().is_ok());
        assert!(bindings.device_management().is_ok());
        assert!(bindings.schedule_management().is_ok());
        assert!(bindings.search_provider_manager.is_none());
    }
}
