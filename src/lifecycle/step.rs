//! Lifecycle steps and composite phases.
//!
//! # Data Flow
//! ```text
//! CompositeStep::execute(owner, monitor)
//!     → for each step, strictly in order:
//!         Simple          → run action; failure aborts
//!         StartComponent  → initialize-if-needed → start → register under owner
//!                           failure aborts only when critical
//!         StopComponent   → stop, failures logged
//!         Composite       → recurse with the same rules
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{FleetError, Result};
use crate::lifecycle::{ComponentCore, LifecycleComponent, LifecycleStatus, ProgressMonitor};

/// Deferred side effect run by a [`LifecycleStep::Simple`] step.
pub type StepAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// One executable unit of a lifecycle phase.
pub enum LifecycleStep {
    Simple {
        name: String,
        action: StepAction,
    },
    StartComponent {
        component: Arc<dyn LifecycleComponent>,
        critical: bool,
        message: String,
    },
    StopComponent {
        component: Arc<dyn LifecycleComponent>,
        message: String,
    },
    Composite(CompositeStep),
}

impl LifecycleStep {
    pub fn simple<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        LifecycleStep::Simple {
            name: name.into(),
            action: Box::new(move || action().boxed()),
        }
    }

    pub fn start_component(
        component: Arc<dyn LifecycleComponent>,
        critical: bool,
        message: impl Into<String>,
    ) -> Self {
        LifecycleStep::StartComponent {
            component,
            critical,
            message: message.into(),
        }
    }

    pub fn stop_component(component: Arc<dyn LifecycleComponent>, message: impl Into<String>) -> Self {
        LifecycleStep::StopComponent {
            component,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LifecycleStep::Simple { name, .. } => name,
            LifecycleStep::StartComponent { message, .. } => message,
            LifecycleStep::StopComponent { message, .. } => message,
            LifecycleStep::Composite(composite) => composite.name(),
        }
    }

    fn leaf_count(&self) -> usize {
        match self {
            LifecycleStep::Composite(composite) => composite.leaf_count(),
            _ => 1,
        }
    }

    fn execute<'a>(self, owner: &'a ComponentCore, monitor: &'a ProgressMonitor) -> BoxFuture<'a, Result<()>> {
        async move {
            match self {
                LifecycleStep::Simple { name, action } => {
                    let result = action().await;
                    monitor.tick(&name);
                    if let Err(error) = &result {
                        tracing::error!(owner = %owner.name(), step = %name, error = %error, "Lifecycle step failed");
                    }
                    result
                }
                LifecycleStep::StartComponent { component, critical, message } => {
                    let result = start_nested(component.as_ref(), monitor).await;
                    monitor.tick(&message);
                    let name = component.name();
                    owner.register_child(component);
                    match result {
                        Ok(()) => Ok(()),
                        Err(cause) if critical => Err(FleetError::ComponentFailure {
                            component: name,
                            message,
                            source: Some(cause),
                        }),
                        Err(cause) => {
                            tracing::warn!(
                                owner = %owner.name(),
                                component = %name,
                                error = %cause,
                                "{} (non-critical, continuing)",
                                message
                            );
                            Ok(())
                        }
                    }
                }
                LifecycleStep::StopComponent { component, message } => {
                    stop_best_effort(component.as_ref(), monitor).await;
                    monitor.tick(&message);
                    Ok(())
                }
                LifecycleStep::Composite(composite) => composite.run(owner, monitor).await,
            }
        }
        .boxed()
    }
}

/// Initialize `component` if it has not been, then start it.
///
/// A component that is already started counts as success.
pub async fn start_nested(
    component: &dyn LifecycleComponent,
    monitor: &ProgressMonitor,
) -> std::result::Result<(), Arc<FleetError>> {
    let core = component.core();
    if core.status() == LifecycleStatus::Started {
        return Ok(());
    }

    if !core.is_initialized() || core.status() == LifecycleStatus::InitializationError {
        component.initialize(monitor).await.map_err(Arc::new)?;
        if core.status() != LifecycleStatus::Stopped {
            return Err(captured_failure(core));
        }
    }

    component.start(monitor).await.map_err(Arc::new)?;
    if core.status() != LifecycleStatus::Started {
        return Err(captured_failure(core));
    }
    Ok(())
}

/// Stop `component`, logging instead of returning any failure.
pub async fn stop_best_effort(component: &dyn LifecycleComponent, monitor: &ProgressMonitor) {
    match component.stop(monitor).await {
        Ok(()) if component.status() == LifecycleStatus::LifecycleError => {
            let error = component.core().last_error();
            tracing::warn!(
                component = %component.name(),
                error = ?error.as_deref().map(ToString::to_string),
                "Component failed to stop cleanly"
            );
        }
        Ok(()) => {}
        Err(error) if error.is_already_in_state() => {
            tracing::debug!(component = %component.name(), "Component already stopped");
        }
        Err(error) => {
            tracing::warn!(component = %component.name(), error = %error, "Unable to stop component");
        }
    }
}

fn captured_failure(core: &ComponentCore) -> Arc<FleetError> {
    core.last_error().unwrap_or_else(|| {
        Arc::new(FleetError::Unexpected(format!(
            "component '{}' ended in status {}",
            core.name(),
            core.status()
        )))
    })
}

/// A named, ordered group of steps executed as one phase.
pub struct CompositeStep {
    name: String,
    steps: Vec<LifecycleStep>,
}

impl CompositeStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn add(&mut self, step: LifecycleStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn add_simple<F, Fut>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add(LifecycleStep::simple(name, action))
    }

    pub fn add_start(
        &mut self,
        component: Arc<dyn LifecycleComponent>,
        critical: bool,
        message: impl Into<String>,
    ) -> &mut Self {
        self.add(LifecycleStep::start_component(component, critical, message))
    }

    pub fn add_stop(&mut self, component: Arc<dyn LifecycleComponent>, message: impl Into<String>) -> &mut Self {
        self.add(LifecycleStep::stop_component(component, message))
    }

    pub fn add_composite(&mut self, composite: CompositeStep) -> &mut Self {
        self.add(LifecycleStep::Composite(composite))
    }

    /// Number of non-composite steps, counted recursively.
    pub fn leaf_count(&self) -> usize {
        self.steps.iter().map(LifecycleStep::leaf_count).sum()
    }

    /// Execute every step in order on behalf of `owner`.
    pub async fn execute(self, owner: &ComponentCore, monitor: &ProgressMonitor) -> Result<()> {
        monitor.expect_steps(self.leaf_count());
        tracing::debug!(owner = %owner.name(), phase = %self.name, steps = self.leaf_count(), "Executing lifecycle phase");
        self.run(owner, monitor).await
    }

    fn run<'a>(self, owner: &'a ComponentCore, monitor: &'a ProgressMonitor) -> BoxFuture<'a, Result<()>> {
        async move {
            for step in self.steps {
                step.execute(owner, monitor).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
