//! Server orchestrator: root lifecycle component of a node.
//!
//! # Data Flow
//! ```text
//! initialize: bootstrap resources → node identity → base services
//!             → validate bindings → management backends → runtime resources
//! start:      clear registrations → base services → user/tenant management
//!             → fleet initialize (bounded) → fleet start (bounded)
//!             → rebuild root index + runtime sampler
//! stop:       sampler → fleet stop (bounded, best-effort) → management → base services
//! ```
//!
//! # Design Decisions
//! - Engine map and token index are `DashMap`s; fleet workers each touch only their own key
//! - Engines that fail during fleet phases stay in the map for diagnosis
//! - Tenant updates swap the record into the running engine; nothing is restarted

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::lifecycle::{
    ComponentCore, ComponentKind, CompositeStep, LifecycleComponent, LifecycleStatus, ProgressMonitor,
};
use crate::management::ServerBindings;
use crate::observability::metrics;
use crate::server::fleet::{FleetPhase, FleetReport};
use crate::server::identity::{load_or_create_identity, ResourceResolver, ServerState};
use crate::server::runtime::{RuntimeInfo, RuntimeSampler};
use crate::tenant::engine::bring_up;
use crate::tenant::{CommandResponse, Tenant, TenantEngine, TenantState};

/// State shared between the orchestrator and the steps it schedules.
struct FleetShared {
    config: FleetConfig,
    bindings: ServerBindings,
    resources: Arc<dyn ResourceResolver>,
    identity: RwLock<Option<ServerState>>,
    engines: DashMap<String, Arc<TenantEngine>>,
    /// auth token → tenant id, for tenants with a live engine.
    tokens: DashMap<String, String>,
    sampler: RuntimeSampler,
    started_at: Instant,
}

impl FleetShared {
    /// The engine for `tenant`, creating and indexing it on first sight.
    ///
    /// An existing engine keeps its own record; the token index always follows that
    /// record, so only a newly created engine adds a token.
    fn engine_for(&self, tenant: Tenant) -> Result<Arc<TenantEngine>> {
        let resolver = self.bindings.tenant_bindings()?;
        let tenant_management = self.bindings.tenant_management()?;
        let depth = self.config.fleet.command_queue_depth;

        match self.engines.entry(tenant.id.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let id = tenant.id.clone();
                let token = tenant.auth_token.clone();
                let engine = TenantEngine::new(tenant, resolver, tenant_management, depth);
                entry.insert(engine.clone());
                self.tokens.insert(token, id);
                Ok(engine)
            }
        }
    }

    fn forget_engine(&self, id: &str) -> Option<Arc<TenantEngine>> {
        let (_, engine) = self.engines.remove(id)?;
        let token = engine.tenant().auth_token;
        self.tokens.remove_if(&token, |_, tenant_id| tenant_id == id);
        Some(engine)
    }

    fn engines(&self) -> Vec<Arc<TenantEngine>> {
        self.engines.iter().map(|e| e.value().clone()).collect()
    }

    fn phase(&self, name: &'static str) -> FleetPhase {
        FleetPhase::from_config(name, &self.config.fleet)
    }

    async fn initialize_tenant_engines(&self) -> Result<FleetReport> {
        let tenants = self.bindings.tenant_management()?.list_tenants().await?;
        let mut engines = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let engine = self.engine_for(tenant)?;
            if engine.core().is_initialized() && engine.status() != LifecycleStatus::InitializationError {
                continue;
            }
            engines.push(engine);
        }

        Ok(self
            .phase("initialize")
            .run(engines, |engine: Arc<TenantEngine>| async move {
                let monitor = ProgressMonitor::new(format!("Initialize {}", engine.name()));
                if let Err(e) = engine.initialize(&monitor).await {
                    tracing::warn!(tenant = %engine.tenant_id(), error = %e, "Tenant engine not initialized");
                    return;
                }
                match engine.status() {
                    LifecycleStatus::Stopped => {
                        tracing::info!(tenant = %engine.tenant_id(), "Tenant engine initialized");
                    }
                    status => tracing::error!(
                        tenant = %engine.tenant_id(),
                        status = %status,
                        error = ?engine.core().last_error().map(|e| e.to_string()),
                        "Tenant engine failed to initialize"
                    ),
                }
            })
            .await)
    }

    async fn start_tenant_engines(&self) -> FleetReport {
        let mut eligible = Vec::new();
        for engine in self.engines() {
            let tenant = engine.tenant();
            if tenant.desired_state == TenantState::Stopped {
                tracing::info!(tenant = %tenant.id, "Skipping tenant engine start, desired state is stopped");
                continue;
            }
            if !engine.core().is_initialized() || engine.status() != LifecycleStatus::Stopped {
                tracing::debug!(tenant = %tenant.id, status = %engine.status(), "Tenant engine not eligible for start");
                continue;
            }
            eligible.push(engine);
        }

        self.phase("start")
            .run(eligible, |engine: Arc<TenantEngine>| async move {
                let monitor = ProgressMonitor::new(format!("Start {}", engine.name()));
                if let Err(e) = engine.start_with(&monitor, false).await {
                    tracing::warn!(tenant = %engine.tenant_id(), error = %e, "Tenant engine not started");
                    return;
                }
                if engine.status() != LifecycleStatus::Started {
                    tracing::error!(
                        tenant = %engine.tenant_id(),
                        status = %engine.status(),
                        error = ?engine.core().last_error().map(|e| e.to_string()),
                        "Tenant engine failed to start"
                    );
                }
            })
            .await
    }

    async fn stop_tenant_engines(&self) -> FleetReport {
        let running: Vec<_> = self
            .engines()
            .into_iter()
            .filter(|e| matches!(e.status(), LifecycleStatus::Started | LifecycleStatus::LifecycleError))
            .collect();

        self.phase("stop")
            .run(running, |engine: Arc<TenantEngine>| async move {
                let monitor = ProgressMonitor::new(format!("Stop {}", engine.name()));
                if let Err(e) = engine.stop_with(&monitor, false).await {
                    tracing::warn!(tenant = %engine.tenant_id(), error = %e, "Unable to stop tenant engine");
                }
            })
            .await
    }

    async fn terminate_tenant_engines(&self) -> FleetReport {
        let engines: Vec<_> = self.engines.iter().map(|e| e.value().clone()).collect();
        self.engines.clear();
        self.tokens.clear();

        self.phase("terminate")
            .run(engines, |engine: Arc<TenantEngine>| async move {
                let monitor = ProgressMonitor::new(format!("Terminate {}", engine.name()));
                if let Err(e) = engine.terminate(&monitor).await {
                    tracing::debug!(tenant = %engine.tenant_id(), error = %e, "Tenant engine not terminated");
                }
            })
            .await
    }

    /// Components indexed under the root after a successful start.
    fn root_components(&self) -> Vec<Arc<dyn LifecycleComponent>> {
        let mut components = self.bindings.auxiliary.clone();
        if let Some(users) = &self.bindings.user_management {
            components.push(users.clone().into_component());
        }
        if let Some(tenants) = &self.bindings.tenant_management {
            components.push(tenants.clone().into_component());
        }
        for engine in self.engines() {
            components.push(engine);
        }
        components
    }

    fn engine_statuses(&self) -> HashMap<LifecycleStatus, usize> {
        let mut counts = HashMap::new();
        for engine in self.engines.iter() {
            *counts.entry(engine.status()).or_insert(0) += 1;
        }
        counts
    }
}

/// Initialize `component` unless it already is, failing if it does not end Stopped.
async fn initialize_required(component: &dyn LifecycleComponent, monitor: &ProgressMonitor, what: &str) -> Result<()> {
    if component.core().is_initialized() && !component.status().is_error() {
        return Ok(());
    }
    component.initialize(monitor).await?;
    monitor.tick(what);
    if component.status() != LifecycleStatus::Stopped {
        return Err(FleetError::ComponentFailure {
            component: component.name(),
            message: format!("Unable to {}", what.to_lowercase()),
            source: component.core().last_error(),
        });
    }
    Ok(())
}

/// Terminate `component`, logging anything other than success.
async fn terminate_best_effort(component: &dyn LifecycleComponent, monitor: &ProgressMonitor) {
    if let Err(e) = component.terminate(monitor).await {
        tracing::debug!(component = %component.name(), error = %e, "Component not terminated");
    }
}

/// Root lifecycle component supervising global services and the tenant engine fleet.
pub struct ServerOrchestrator {
    core: Arc<ComponentCore>,
    shared: Arc<FleetShared>,
}

impl ServerOrchestrator {
    pub fn new(config: FleetConfig, bindings: ServerBindings, resources: Arc<dyn ResourceResolver>) -> Self {
        let started_at = Instant::now();
        let name = format!("Server '{}'", config.server.instance_id);
        Self {
            core: ComponentCore::shared(name, ComponentKind::System),
            shared: Arc::new(FleetShared {
                sampler: RuntimeSampler::new(config.monitoring.clone(), started_at),
                config,
                bindings,
                resources,
                identity: RwLock::new(None),
                engines: DashMap::new(),
                tokens: DashMap::new(),
                started_at,
            }),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.shared.config
    }

    /// Persistent node id, known once initialize has run.
    pub fn node_id(&self) -> Option<Uuid> {
        self.shared.identity.read().as_ref().map(|s| s.node_id)
    }

    pub fn tenant_engines(&self) -> Vec<Arc<TenantEngine>> {
        self.shared.engines()
    }

    /// Initialize an engine for every known tenant on the bounded pool.
    pub async fn initialize_tenant_engines(&self) -> Result<FleetReport> {
        self.shared.initialize_tenant_engines().await
    }

    /// Start every initialized engine whose tenant wants to run.
    pub async fn start_tenant_engines(&self) -> FleetReport {
        self.shared.start_tenant_engines().await
    }

    pub async fn stop_tenant_engines(&self) -> FleetReport {
        self.shared.stop_tenant_engines().await
    }

    /// Engine for `tenant_id`, created on first access.
    ///
    /// Returns `None` when the tenant does not exist or its engine fails to come up; a
    /// lazily created engine that fails is not kept.
    pub async fn tenant_engine(&self, tenant_id: &str) -> Result<Option<Arc<TenantEngine>>> {
        if let Some(engine) = self.shared.engines.get(tenant_id).map(|e| e.value().clone()) {
            return Ok(Some(engine));
        }

        let Some(tenant) = self.shared.bindings.tenant_management()?.get_tenant(tenant_id).await? else {
            return Ok(None);
        };
        match self.bring_up_engine(tenant).await {
            Ok(engine) => Ok(Some(engine)),
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, error = %e, "Lazy tenant engine startup failed");
                self.shared.forget_engine(tenant_id);
                Ok(None)
            }
        }
    }

    /// Create, initialize and (when its desired state is Started) start an engine.
    async fn bring_up_engine(&self, tenant: Tenant) -> Result<Arc<TenantEngine>> {
        let wants_start = tenant.desired_state == TenantState::Started;
        let engine = self.shared.engine_for(tenant)?;
        let monitor = ProgressMonitor::new(format!("Bring up {}", engine.name()));

        if wants_start {
            bring_up(&engine, &monitor).await?;
        } else {
            initialize_required(engine.as_ref(), &monitor, "Initialize tenant engine").await?;
        }
        Ok(engine)
    }

    /// Tenants visible to `user_id`, optionally only those with a started engine.
    pub async fn authorized_tenants(&self, user_id: &str, require_started: bool) -> Result<Vec<Tenant>> {
        let Some(user) = self.shared.bindings.user_management()?.get_user(user_id).await? else {
            return Ok(Vec::new());
        };

        let tenants = self.shared.bindings.tenant_management()?.list_tenants().await?;
        let mut visible = Vec::new();
        for tenant in tenants.into_iter().filter(|t| t.is_authorized(&user)) {
            let engine = self.shared.engines.get(&tenant.id).map(|e| e.value().clone());
            match engine {
                Some(engine) if !require_started || engine.status() == LifecycleStatus::Started => {
                    visible.push(engine.tenant());
                }
                Some(_) => {}
                None if !require_started => visible.push(tenant),
                None => {}
            }
        }
        Ok(visible)
    }

    pub fn tenant_by_auth_token(&self, token: &str) -> Option<Tenant> {
        let tenant_id = self.shared.tokens.get(token)?.value().clone();
        self.shared.engines.get(&tenant_id).map(|e| e.value().tenant())
    }

    /// Engine for a tenant created after startup.
    pub async fn on_tenant_added(&self, tenant: Tenant) -> Result<Arc<TenantEngine>> {
        tracing::info!(tenant = %tenant.id, "Tenant added");
        self.bring_up_engine(tenant).await
    }

    /// Swap an updated tenant record into its running engine.
    pub fn on_tenant_updated(&self, tenant: Tenant) {
        let Some(engine) = self.shared.engines.get(&tenant.id).map(|e| e.value().clone()) else {
            tracing::debug!(tenant = %tenant.id, "Updated tenant has no engine");
            return;
        };

        let previous = engine.tenant();
        if previous.auth_token != tenant.auth_token {
            self.shared.tokens.remove(&previous.auth_token);
        }
        self.shared.tokens.insert(tenant.auth_token.clone(), tenant.id.clone());
        tracing::info!(tenant = %tenant.id, "Tenant updated");
        engine.update_tenant(tenant);
    }

    /// Tear down and forget the engine of a deleted tenant.
    pub async fn on_tenant_deleted(&self, tenant_id: &str) {
        let Some(engine) = self.shared.engines.get(tenant_id).map(|e| e.value().clone()) else {
            return;
        };

        if engine.status() == LifecycleStatus::Started {
            let monitor = ProgressMonitor::new(format!("Remove {}", engine.name()));
            if let Err(e) = engine.stop_with(&monitor, false).await {
                tracing::warn!(tenant = %tenant_id, error = %e, "Unable to stop deleted tenant engine");
            }
            terminate_best_effort(engine.as_ref(), &monitor).await;
        }
        self.shared.forget_engine(tenant_id);
        tracing::info!(tenant = %tenant_id, "Tenant deleted, engine removed");
    }

    /// Run a named command against one tenant's engine with the configured timeout.
    pub async fn issue_tenant_command(&self, tenant_id: &str, command: &str) -> Result<Option<CommandResponse>> {
        let Some(engine) = self.tenant_engine(tenant_id).await? else {
            return Ok(None);
        };
        let response = engine.issue_command(command, self.shared.config.fleet.command_timeout()).await?;
        Ok(Some(response))
    }

    pub fn runtime_info(&self, include_history: bool) -> RuntimeInfo {
        let engines_by_status = self.shared.engine_statuses();
        metrics::record_engine_statuses(&engines_by_status);

        RuntimeInfo {
            node_id: self.node_id(),
            instance_id: self.shared.config.server.instance_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: self.status(),
            uptime_secs: self.shared.started_at.elapsed().as_secs(),
            memory: self.shared.sampler.sample_now(),
            engines_by_status,
            history: include_history.then(|| self.shared.sampler.history()),
        }
    }
}

#[async_trait]
impl LifecycleComponent for ServerOrchestrator {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    async fn on_initialize(&self, monitor: &ProgressMonitor) -> Result<()> {
        let shared = &self.shared;
        monitor.expect_steps(shared.bindings.auxiliary.len() + 5);

        shared.resources.start_bootstrap()?;
        monitor.tick("Start bootstrap resources");

        let identity = load_or_create_identity(shared.resources.as_ref())?;
        *shared.identity.write() = Some(identity);
        monitor.tick("Load server identity");

        for component in &shared.bindings.auxiliary {
            initialize_required(component.as_ref(), monitor, "Initialize base service").await?;
        }

        shared.bindings.validate()?;
        let tenants = shared.bindings.tenant_management()?;
        let users = shared.bindings.user_management()?;
        initialize_required(users.into_component().as_ref(), monitor, "Initialize user management").await?;
        initialize_required(tenants.into_component().as_ref(), monitor, "Initialize tenant management").await?;

        shared.resources.start_runtime()?;
        monitor.tick("Start runtime resources");
        Ok(())
    }

    async fn on_start(&self, monitor: &ProgressMonitor) -> Result<()> {
        let users = self.shared.bindings.user_management()?;
        let tenants = self.shared.bindings.tenant_management()?;

        let mut phase = CompositeStep::new(format!("Start {}", self.core.name()));

        let core = self.core.clone();
        phase.add_simple("Clear component registrations", move || async move {
            core.clear_children();
            Ok(())
        });

        let mut base = CompositeStep::new("Start base services");
        for component in &self.shared.bindings.auxiliary {
            base.add_start(component.clone(), true, format!("Start {}", component.name()));
        }
        phase
            .add_composite(base)
            .add_start(users.into_component(), true, "Start user management")
            .add_start(tenants.into_component(), true, "Start tenant management");

        let shared = self.shared.clone();
        phase.add_simple("Initialize tenant engines", move || async move {
            shared.initialize_tenant_engines().await.map(|_| ())
        });

        let shared = self.shared.clone();
        phase.add_simple("Start tenant engines", move || async move {
            shared.start_tenant_engines().await;
            Ok(())
        });

        let shared = self.shared.clone();
        let core = self.core.clone();
        phase.add_simple("Finalize server startup", move || async move {
            core.clear_children();
            for component in shared.root_components() {
                core.register_child(component);
            }
            shared.sampler.start();
            metrics::record_engine_statuses(&shared.engine_statuses());
            core.log_hierarchy();
            Ok(())
        });

        monitor.expect_steps(phase.leaf_count());
        phase.execute(&self.core, monitor).await
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.shared.sampler.stop();
        self.shared.stop_tenant_engines().await;

        let mut phase = CompositeStep::new(format!("Stop {}", self.core.name()));
        if let Some(tenants) = &self.shared.bindings.tenant_management {
            phase.add_stop(tenants.clone().into_component(), "Stop tenant management");
        }
        if let Some(users) = &self.shared.bindings.user_management {
            phase.add_stop(users.clone().into_component(), "Stop user management");
        }
        for component in self.shared.bindings.auxiliary.iter().rev() {
            phase.add_stop(component.clone(), format!("Stop {}", component.name()));
        }
        phase.execute(&self.core, monitor).await
    }

    async fn on_terminate(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.shared.terminate_tenant_engines().await;

        if let Some(tenants) = &self.shared.bindings.tenant_management {
            terminate_best_effort(tenants.clone().into_component().as_ref(), monitor).await;
        }
        if let Some(users) = &self.shared.bindings.user_management {
            terminate_best_effort(users.clone().into_component().as_ref(), monitor).await;
        }
        for component in self.shared.bindings.auxiliary.iter().rev() {
            terminate_best_effort(component.as_ref(), monitor).await;
        }
        self.core.clear_children();
        Ok(())
    }
}
