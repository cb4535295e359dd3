//! Lifecycle component base: identity, status, registration and transition driver.
//!
//! # Responsibilities
//! - Hold the per-component state every managed unit shares ([`ComponentCore`])
//! - Enforce legal status transitions and capture hook failures as status
//! - Maintain the children index used for hierarchy reporting
//!
//! # Design Decisions
//! - Parent is stored as an id, never as a pointer; children are owned by the index
//! - Status lives in an `AtomicU8` and transitions use compare-exchange, so two callers
//!   can never both enter the same transition
//! - Hook errors (and panics) become status + last error; only misuse is returned

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::lifecycle::{ComponentKind, LifecycleStatus, ProgressMonitor};
use crate::observability::metrics;

/// Unique component identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The four externally driven lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initialize,
    Start,
    Stop,
    Terminate,
}

impl Transition {
    pub fn verb(&self) -> &'static str {
        match self {
            Transition::Initialize => "initialize",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Terminate => "terminate",
        }
    }

    fn in_progress(&self) -> LifecycleStatus {
        match self {
            Transition::Initialize => LifecycleStatus::Initializing,
            Transition::Start => LifecycleStatus::Starting,
            Transition::Stop => LifecycleStatus::Stopping,
            Transition::Terminate => LifecycleStatus::Terminating,
        }
    }

    fn success(&self) -> LifecycleStatus {
        match self {
            Transition::Initialize | Transition::Stop => LifecycleStatus::Stopped,
            Transition::Start => LifecycleStatus::Started,
            Transition::Terminate => LifecycleStatus::Terminated,
        }
    }

    fn failure(&self) -> LifecycleStatus {
        match self {
            Transition::Initialize => LifecycleStatus::InitializationError,
            _ => LifecycleStatus::LifecycleError,
        }
    }

    /// Whether `status` already is what this transition would produce.
    fn already_in(&self, status: LifecycleStatus) -> bool {
        match self {
            Transition::Initialize | Transition::Start => status == LifecycleStatus::Started,
            Transition::Stop => status == LifecycleStatus::Stopped,
            Transition::Terminate => status == LifecycleStatus::Terminated,
        }
    }

    fn accepts(&self, status: LifecycleStatus, initialized: bool) -> bool {
        use LifecycleStatus::*;
        match self {
            Transition::Initialize => matches!(status, Stopped | InitializationError),
            Transition::Start => (status == Stopped && initialized) || status == LifecycleError,
            Transition::Stop => matches!(status, Started | LifecycleError),
            Transition::Terminate => matches!(status, Stopped | InitializationError | LifecycleError),
        }
    }
}

/// Flat view of one component, as reported in hierarchy snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub id: ComponentId,
    pub name: String,
    pub status: LifecycleStatus,
    pub kind: ComponentKind,
    pub parent_id: Option<ComponentId>,
}

/// State shared by every lifecycle component.
pub struct ComponentCore {
    id: ComponentId,
    name: RwLock<String>,
    kind: ComponentKind,
    status: AtomicU8,
    initialized: AtomicBool,
    parent: Mutex<Option<ComponentId>>,
    children: RwLock<IndexMap<ComponentId, Arc<dyn LifecycleComponent>>>,
    last_error: Mutex<Option<Arc<FleetError>>>,
}

impl ComponentCore {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            id: ComponentId::new(),
            name: RwLock::new(name.into()),
            kind,
            status: AtomicU8::new(LifecycleStatus::Stopped as u8),
            initialized: AtomicBool::new(false),
            parent: Mutex::new(None),
            children: RwLock::new(IndexMap::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn shared(name: impl Into<String>, kind: ComponentKind) -> Arc<Self> {
        Arc::new(Self::new(name, kind))
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn parent(&self) -> Option<ComponentId> {
        *self.parent.lock()
    }

    /// Error captured by the most recent failed transition, if any.
    pub fn last_error(&self) -> Option<Arc<FleetError>> {
        self.last_error.lock().clone()
    }

    // --- Children index ---

    /// Add `child` to this component's index and record this component as its parent.
    pub fn register_child(&self, child: Arc<dyn LifecycleComponent>) {
        let child_core = child.core();
        *child_core.parent.lock() = Some(self.id);
        self.children.write().insert(child_core.id(), child);
    }

    pub fn unregister_child(&self, id: ComponentId) -> Option<Arc<dyn LifecycleComponent>> {
        let removed = self.children.write().shift_remove(&id);
        if let Some(child) = &removed {
            *child.core().parent.lock() = None;
        }
        removed
    }

    pub fn clear_children(&self) {
        self.children.write().clear();
    }

    /// Components registered by the last successful start, in registration order.
    pub fn children(&self) -> Vec<Arc<dyn LifecycleComponent>> {
        self.children.read().values().cloned().collect()
    }

    /// Recursively collect registered components of the given kind.
    pub fn find_components_of_kind(&self, kind: ComponentKind) -> Vec<Arc<dyn LifecycleComponent>> {
        let mut found = Vec::new();
        for child in self.children() {
            if child.core().kind() == kind {
                found.push(child.clone());
            }
            found.extend(child.core().find_components_of_kind(kind));
        }
        found
    }

    /// Depth-first snapshot of this component and everything below it.
    pub fn snapshot_hierarchy(&self) -> Vec<ComponentSnapshot> {
        let mut out = Vec::new();
        self.collect_snapshot(None, &mut out);
        out
    }

    fn collect_snapshot(&self, parent_id: Option<ComponentId>, out: &mut Vec<ComponentSnapshot>) {
        out.push(ComponentSnapshot {
            id: self.id,
            name: self.name(),
            status: self.status(),
            kind: self.kind,
            parent_id,
        });
        for child in self.children() {
            child.core().collect_snapshot(Some(self.id), out);
        }
    }

    /// Log the component tree, one indented line per component.
    pub fn log_hierarchy(&self) {
        self.log_level(0);
    }

    fn log_level(&self, depth: usize) {
        let line = format!(
            "{}+ {} [{}] {}",
            "  ".repeat(depth),
            self.name(),
            self.kind,
            self.status()
        );
        tracing::info!("{}", line);
        for child in self.children() {
            child.core().log_level(depth + 1);
        }
    }

    // --- Transitions ---

    fn begin(&self, transition: Transition) -> Result<()> {
        let initialized = self.is_initialized();
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let status = LifecycleStatus::from(current);
            if !transition.accepts(status, initialized) {
                return Err(self.rejection(transition, status));
            }
            match self.status.compare_exchange(
                current,
                transition.in_progress() as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn rejection(&self, transition: Transition, status: LifecycleStatus) -> FleetError {
        if transition.already_in(status) {
            FleetError::AlreadyInState {
                component: self.name(),
                status,
            }
        } else {
            FleetError::IllegalTransition {
                component: self.name(),
                operation: transition.verb(),
                status,
            }
        }
    }

    fn complete(&self, transition: Transition, outcome: Result<()>) {
        let status = match outcome {
            Ok(()) => {
                if transition == Transition::Initialize {
                    self.initialized.store(true, Ordering::Release);
                }
                *self.last_error.lock() = None;
                transition.success()
            }
            Err(error) => {
                tracing::error!(
                    component = %self.name(),
                    operation = transition.verb(),
                    error = %error,
                    "Lifecycle operation failed"
                );
                *self.last_error.lock() = Some(Arc::new(error));
                transition.failure()
            }
        };
        self.status.store(status as u8, Ordering::Release);
        tracing::info!(component = %self.name(), kind = %self.kind, status = %status, "Lifecycle status changed");
        metrics::record_lifecycle_transition(self.kind, status);
    }
}

impl fmt::Debug for ComponentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCore")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// Run `hook` as the body of `transition` on `core`.
///
/// Returns `Err` only when the transition is not legal from the current status. A hook
/// that fails or panics leaves the component in the matching error status instead.
pub async fn drive<F>(core: &ComponentCore, transition: Transition, hook: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send,
{
    core.begin(transition)?;
    let outcome = match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(FleetError::Unexpected(panic_message(panic.as_ref()))),
    };
    core.complete(transition, outcome);
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "lifecycle hook panicked".to_string()
    }
}

/// A unit governed by the initialize/start/stop/terminate state machine.
///
/// Implementors provide [`core`](Self::core) and override the `on_*` hooks they need.
/// The driver methods (`initialize`, `start`, `stop`, `terminate`) are not meant to be
/// overridden; callers inspect [`status`](Self::status) afterwards.
#[async_trait]
pub trait LifecycleComponent: Send + Sync + 'static {
    fn core(&self) -> &Arc<ComponentCore>;

    async fn on_initialize(&self, _monitor: &ProgressMonitor) -> Result<()> {
        Ok(())
    }

    async fn on_start(&self, _monitor: &ProgressMonitor) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self, _monitor: &ProgressMonitor) -> Result<()> {
        Ok(())
    }

    async fn on_terminate(&self, _monitor: &ProgressMonitor) -> Result<()> {
        Ok(())
    }

    async fn initialize(&self, monitor: &ProgressMonitor) -> Result<()> {
        drive(self.core(), Transition::Initialize, self.on_initialize(monitor)).await
    }

    async fn start(&self, monitor: &ProgressMonitor) -> Result<()> {
        drive(self.core(), Transition::Start, self.on_start(monitor)).await
    }

    async fn stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        drive(self.core(), Transition::Stop, self.on_stop(monitor)).await
    }

    async fn terminate(&self, monitor: &ProgressMonitor) -> Result<()> {
        drive(self.core(), Transition::Terminate, self.on_terminate(monitor)).await
    }

    fn id(&self) -> ComponentId {
        self.core().id()
    }

    fn name(&self) -> String {
        self.core().name()
    }

    fn status(&self) -> LifecycleStatus {
        self.core().status()
    }
}

/// Upcast from a capability trait object to the plain lifecycle view.
pub trait IntoComponent {
    fn into_component(self: Arc<Self>) -> Arc<dyn LifecycleComponent>;
}

impl<T: LifecycleComponent> IntoComponent for T {
    fn into_component(self: Arc<Self>) -> Arc<dyn LifecycleComponent> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        core: Arc<ComponentCore>,
        fail_initialize: bool,
        panic_on_start: bool,
        starts: AtomicUsize,
    }

    impl Probe {
        fn new(name: &str) -> Self {
            Self {
                core: ComponentCore::shared(name, ComponentKind::Auxiliary),
                fail_initialize: false,
                panic_on_start: false,
                starts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LifecycleComponent for Probe {
        fn core(&self) -> &Arc<ComponentCore> {
            &self.core
        }

        async fn on_initialize(&self, _monitor: &ProgressMonitor) -> Result<()> {
            if self.fail_initialize {
                return Err(FleetError::configuration("No device management implementation configured."));
            }
            Ok(())
        }

        async fn on_start(&self, _monitor: &ProgressMonitor) -> Result<()> {
            if self.panic_on_start {
                panic!("boom");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_twice_reports_already_started() {
        let probe = Probe::new("probe");
        let monitor = ProgressMonitor::new("test");
        probe.initialize(&monitor).await.unwrap();
        probe.start(&monitor).await.unwrap();

        let err = probe.start(&monitor).await.unwrap_err();
        assert!(err.is_already_in_state());
        assert_eq!(probe.status(), LifecycleStatus::Started);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_while_stopped_is_rejected() {
        let probe = Probe::new("probe");
        let monitor = ProgressMonitor::new("test");
        probe.initialize(&monitor).await.unwrap();

        let err = probe.stop(&monitor).await.unwrap_err();
        assert!(err.is_already_in_state());
        assert_eq!(probe.status(), LifecycleStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_requires_initialize() {
        let probe = Probe::new("probe");
        let monitor = ProgressMonitor::new("test");
        let err = probe.start(&monitor).await.unwrap_err();
        assert!(matches!(err, FleetError::IllegalTransition { operation: "start", .. }));
        assert_eq!(probe.status(), LifecycleStatus::Stopped);
    }

    #[tokio::test]
    async fn test_failed_initialize_is_captured() {
        let mut probe = Probe::new("probe");
        probe.fail_initialize = true;
        let monitor = ProgressMonitor::new("test");

        probe.initialize(&monitor).await.unwrap();
        assert_eq!(probe.status(), LifecycleStatus::InitializationError);
        let err = probe.core().last_error().unwrap();
        assert!(matches!(*err, FleetError::Configuration(_)));

        // Retry is legal from the error state.
        probe.fail_initialize = false;
        probe.initialize(&monitor).await.unwrap();
        assert_eq!(probe.status(), LifecycleStatus::Stopped);
        assert!(probe.core().last_error().is_none());
    }

    #[tokio::test]
    async fn test_panicking_hook_becomes_lifecycle_error() {
        let mut probe = Probe::new("probe");
        probe.panic_on_start = true;
        let monitor = ProgressMonitor::new("test");
        probe.initialize(&monitor).await.unwrap();
        probe.start(&monitor).await.unwrap();

        assert_eq!(probe.status(), LifecycleStatus::LifecycleError);
        let err = probe.core().last_error().unwrap();
        assert!(matches!(&*err, FleetError::Unexpected(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_terminate_after_stop() {
        let probe = Probe::new("probe");
        let monitor = ProgressMonitor::new("test");
        probe.initialize(&monitor).await.unwrap();
        probe.start(&monitor).await.unwrap();

        let err = probe.terminate(&monitor).await.unwrap_err();
        assert!(matches!(err, FleetError::IllegalTransition { .. }));

        probe.stop(&monitor).await.unwrap();
        probe.terminate(&monitor).await.unwrap();
        assert_eq!(probe.status(), LifecycleStatus::Terminated);
    }

    #[test]
    fn test_hierarchy_snapshot_records_parents() {
        let root = ComponentCore::new("root", ComponentKind::System);
        let child: Arc<dyn LifecycleComponent> = Arc::new(Probe::new("child"));
        let grandchild: Arc<dyn LifecycleComponent> = Arc::new(Probe::new("grandchild"));
        child.core().register_child(grandchild.clone());
        root.register_child(child.clone());

        let snapshot = root.snapshot_hierarchy();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].parent_id, None);
        assert_eq!(snapshot[1].id, child.id());
        assert_eq!(snapshot[1].parent_id, Some(root.id()));
        assert_eq!(snapshot[2].parent_id, Some(child.id()));

        root.clear_children();
        assert_eq!(root.snapshot_hierarchy().len(), 1);
    }
}
