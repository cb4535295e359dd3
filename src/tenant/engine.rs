//! Tenant engine: per-tenant runtime container.
//!
//! # Responsibilities
//! - Resolve and validate the tenant's management handles at initialize
//! - Run tenant core functions (base services + management) independently of start
//! - Start/stop the search provider manager and outbound communication
//! - Serialize external commands through a single-worker queue
//!
//! # Design Decisions
//! - Tenant record is swapped atomically on update; the engine is never restarted for it
//! - Explicit stops persist the desired state; fleet stops do not

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{FleetError, Result};
use crate::lifecycle::{
    start_nested, ComponentCore, ComponentKind, CompositeStep, LifecycleComponent, LifecycleStatus, ProgressMonitor,
};
use crate::management::memory::LocalService;
use crate::management::{
    AssetManagement, DeviceEventManagement, DeviceManagement, OutboundCommunication, ScheduleManagement,
    SearchProviderManager, TenantBindingResolver, TenantManagement,
};
use crate::tenant::commands::{CommandQueue, EngineCommand};
use crate::tenant::{CommandResponse, EngineState, Tenant, TenantState};

/// Handles resolved for a tenant during initialize.
#[derive(Clone)]
struct TenantServices {
    auxiliary: Vec<Arc<dyn LifecycleComponent>>,
    outbound: Arc<dyn OutboundCommunication>,
    search: Arc<dyn SearchProviderManager>,
    device: Arc<dyn DeviceManagement>,
    event: Arc<dyn DeviceEventManagement>,
    asset: Arc<dyn AssetManagement>,
    schedule: Arc<dyn ScheduleManagement>,
}

impl TenantServices {
    /// Components started by core functions, in start order.
    fn core_components(&self) -> Vec<Arc<dyn LifecycleComponent>> {
        let mut components = self.auxiliary.clone();
        components.push(self.device.clone().into_component());
        components.push(self.event.clone().into_component());
        components.push(self.asset.clone().into_component());
        components.push(self.schedule.clone().into_component());
        components
    }
}

fn engine_name(tenant: &Tenant) -> String {
    format!("TenantEngine '{}' ({})", tenant.name, tenant.id)
}

/// Runtime container for one tenant.
pub struct TenantEngine {
    core: Arc<ComponentCore>,
    tenant: ArcSwap<Tenant>,
    resolver: Arc<dyn TenantBindingResolver>,
    tenant_management: Arc<dyn TenantManagement>,
    services: RwLock<Option<TenantServices>>,
    commands: CommandQueue,
}

impl TenantEngine {
    /// Create an engine and spawn its command worker. Must run inside a Tokio runtime.
    pub fn new(
        tenant: Tenant,
        resolver: Arc<dyn TenantBindingResolver>,
        tenant_management: Arc<dyn TenantManagement>,
        command_queue_depth: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            core: ComponentCore::shared(engine_name(&tenant), ComponentKind::TenantEngine),
            tenant: ArcSwap::from_pointee(tenant),
            resolver,
            tenant_management,
            services: RwLock::new(None),
            commands: CommandQueue::spawn(weak.clone(), command_queue_depth),
        })
    }

    pub fn tenant_id(&self) -> String {
        self.tenant.load().id.clone()
    }

    /// Current tenant record, with `last_known_state` reflecting the engine status.
    pub fn tenant(&self) -> Tenant {
        let mut tenant = Tenant::clone(&self.tenant.load());
        tenant.last_known_state = Some(self.status());
        tenant
    }

    /// Swap in an updated tenant record without restarting the engine.
    pub fn update_tenant(&self, tenant: Tenant) {
        self.core.set_name(engine_name(&tenant));
        self.tenant.store(Arc::new(tenant));
    }

    pub fn device_management(&self) -> Option<Arc<dyn DeviceManagement>> {
        self.services.read().as_ref().map(|s| s.device.clone())
    }

    pub fn event_management(&self) -> Option<Arc<dyn DeviceEventManagement>> {
        self.services.read().as_ref().map(|s| s.event.clone())
    }

    pub fn asset_management(&self) -> Option<Arc<dyn AssetManagement>> {
        self.services.read().as_ref().map(|s| s.asset.clone())
    }

    pub fn schedule_management(&self) -> Option<Arc<dyn ScheduleManagement>> {
        self.services.read().as_ref().map(|s| s.schedule.clone())
    }

    pub fn outbound_communication(&self) -> Option<Arc<dyn OutboundCommunication>> {
        self.services.read().as_ref().map(|s| s.outbound.clone())
    }

    pub fn search_provider_manager(&self) -> Option<Arc<dyn SearchProviderManager>> {
        self.services.read().as_ref().map(|s| s.search.clone())
    }

    fn services(&self) -> Result<TenantServices> {
        self.services
            .read()
            .clone()
            .ok_or_else(|| FleetError::configuration(format!("{} has not been initialized", self.core.name())))
    }

    /// Start the engine; `persist` records desired state Started for the next boot.
    pub async fn start_with(&self, monitor: &ProgressMonitor, persist: bool) -> Result<()> {
        self.start(monitor).await?;
        if persist && self.status() == LifecycleStatus::Started {
            self.persist_desired_state(TenantState::Started).await?;
        }
        Ok(())
    }

    /// Stop the engine.
    ///
    /// `persist` marks an explicit external stop: desired state Stopped is recorded so the
    /// engine stays down on the next boot. Fleet-wide shutdown passes `false`.
    pub async fn stop_with(&self, monitor: &ProgressMonitor, persist: bool) -> Result<()> {
        self.stop(monitor).await?;
        if persist {
            self.persist_desired_state(TenantState::Stopped).await?;
        }
        Ok(())
    }

    async fn persist_desired_state(&self, state: TenantState) -> Result<()> {
        let id = self.tenant_id();
        self.tenant_management.update_desired_state(&id, state).await?;
        self.tenant.rcu(|current| {
            let mut tenant = Tenant::clone(current);
            tenant.desired_state = state;
            tenant
        });
        tracing::info!(tenant = %id, desired_state = ?state, "Persisted tenant desired state");
        Ok(())
    }

    /// Run a named command on this engine's queue, waiting at most `timeout` for its result.
    ///
    /// A full queue fails with `CommandQueueFull`. Once queued, a command that outlives
    /// the wait keeps running and a `Submitted` response is returned.
    pub async fn issue_command(&self, name: &str, timeout: Duration) -> Result<CommandResponse> {
        let command: EngineCommand = name.parse()?;
        let reply = self.commands.submit(&self.tenant_id(), command)?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(response) => response.map_err(|_| FleetError::CommandQueueClosed)?,
            Err(_) => {
                tracing::debug!(tenant = %self.tenant_id(), command = %command, "Command still running after caller timeout");
                Ok(CommandResponse::submitted())
            }
        }
    }

    pub(crate) async fn execute_command(&self, command: EngineCommand) -> Result<CommandResponse> {
        let monitor = ProgressMonitor::new(format!("{} command", command));
        match command {
            EngineCommand::Start => {
                self.ensure_initialized(&monitor).await?;
                self.start_with(&monitor, true).await?;
                Ok(self.outcome(LifecycleStatus::Started, "Tenant engine started."))
            }
            EngineCommand::Stop => {
                self.stop_with(&monitor, true).await?;
                Ok(self.outcome(LifecycleStatus::Stopped, "Tenant engine stopped."))
            }
            EngineCommand::Restart => {
                if let Err(e) = self.stop_with(&monitor, false).await {
                    if !e.is_already_in_state() {
                        return Err(e);
                    }
                }
                self.ensure_initialized(&monitor).await?;
                self.start_with(&monitor, false).await?;
                Ok(self.outcome(LifecycleStatus::Started, "Tenant engine restarted."))
            }
        }
    }

    async fn ensure_initialized(&self, monitor: &ProgressMonitor) -> Result<()> {
        if !self.core.is_initialized() || self.status() == LifecycleStatus::InitializationError {
            self.initialize(monitor).await?;
        }
        Ok(())
    }

    fn outcome(&self, expected: LifecycleStatus, message: &str) -> CommandResponse {
        if self.status() == expected {
            CommandResponse::successful(message)
        } else {
            let cause = self
                .core
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("engine is {}", self.status()));
            CommandResponse::failed(cause)
        }
    }

    /// Status plus, while started, the full component hierarchy.
    pub fn engine_state(&self) -> EngineState {
        let status = self.status();
        EngineState {
            tenant_id: self.tenant_id(),
            status,
            last_error: self.core.last_error().map(|e| e.to_string()),
            components: (status == LifecycleStatus::Started).then(|| self.core.snapshot_hierarchy()),
        }
    }
}

#[async_trait]
impl LifecycleComponent for TenantEngine {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    async fn on_initialize(&self, monitor: &ProgressMonitor) -> Result<()> {
        let tenant = self.tenant.load_full();
        let bindings = self.resolver.resolve(&tenant)?;

        for component in &bindings.auxiliary {
            if component.status() == LifecycleStatus::Started {
                continue;
            }
            component.initialize(monitor).await?;
            if component.status() != LifecycleStatus::Stopped {
                return Err(FleetError::ComponentFailure {
                    component: component.name(),
                    message: "Unable to initialize tenant base service".into(),
                    source: component.core().last_error(),
                });
            }
        }

        let outbound = bindings.outbound_communication()?;
        let device = bindings.device_management()?;
        let event = bindings.event_management()?;
        let asset = bindings.asset_management()?;
        let schedule = bindings.schedule_management()?;
        let search = bindings
            .search_provider_manager
            .clone()
            .unwrap_or_else(|| LocalService::default_search_provider() as Arc<dyn SearchProviderManager>);

        let services = TenantServices {
            auxiliary: bindings.auxiliary,
            outbound,
            search,
            device,
            event,
            asset,
            schedule,
        };
        *self.services.write() = Some(services.clone());

        let mut core_functions = CompositeStep::new(format!("Core functions for tenant '{}'", tenant.id));
        for component in &services.auxiliary {
            core_functions.add_start(component.clone(), true, "Start tenant base service");
        }
        core_functions
            .add_start(services.device.clone().into_component(), true, "Start device management")
            .add_start(services.event.clone().into_component(), true, "Start device event management")
            .add_start(services.asset.clone().into_component(), true, "Start asset management")
            .add_start(services.schedule.clone().into_component(), true, "Start schedule management");
        core_functions.execute(&self.core, monitor).await
    }

    async fn on_start(&self, monitor: &ProgressMonitor) -> Result<()> {
        let services = self.services()?;

        let mut phase = CompositeStep::new(format!("Start {}", self.core.name()));
        let core = self.core.clone();
        phase.add_simple("Clear component registrations", move || async move {
            core.clear_children();
            Ok(())
        });
        phase
            .add_start(services.search.clone().into_component(), true, "Start search provider manager")
            .add_start(services.outbound.clone().into_component(), true, "Start outbound communication");
        let core = self.core.clone();
        let core_components = services.core_components();
        phase.add_simple("Rebuild component index", move || async move {
            for component in core_components {
                core.register_child(component);
            }
            Ok(())
        });
        phase.execute(&self.core, monitor).await
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        let services = self.services()?;

        let mut phase = CompositeStep::new(format!("Stop {}", self.core.name()));
        phase
            .add_stop(services.outbound.clone().into_component(), "Stop outbound communication")
            .add_stop(services.search.clone().into_component(), "Stop search provider manager");
        phase.execute(&self.core, monitor).await
    }

    async fn on_terminate(&self, monitor: &ProgressMonitor) -> Result<()> {
        let services = self.services.write().take();
        let Some(services) = services else {
            return Ok(());
        };

        let mut phase = CompositeStep::new(format!("Terminate {}", self.core.name()));
        for component in &services.auxiliary {
            phase.add_stop(component.clone(), "Stop tenant base service");
        }
        phase
            .add_stop(services.schedule.clone().into_component(), "Stop schedule management")
            .add_stop(services.event.clone().into_component(), "Stop device event management")
            .add_stop(services.device.clone().into_component(), "Stop device management")
            .add_stop(services.asset.clone().into_component(), "Stop asset management");
        phase.execute(&self.core, monitor).await?;
        self.core.clear_children();
        Ok(())
    }
}

/// Initialize-then-start used by lazy engine creation paths.
pub(crate) async fn bring_up(engine: &TenantEngine, monitor: &ProgressMonitor) -> Result<()> {
    start_nested(engine, monitor).await.map_err(|cause| FleetError::ComponentFailure {
        component: engine.name(),
        message: "Unable to start tenant engine".into(),
        source: Some(cause),
    })
}
