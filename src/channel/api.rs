//! API channels: typed facades over a single connection channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::channel::connection::{ConnectionChannel, ConnectivityState};
use crate::error::{FleetError, Result};
use crate::lifecycle::{ComponentCore, LifecycleComponent, ProgressMonitor};
use crate::management::TenantManagement;
use crate::observability::metrics;
use crate::tenant::{Tenant, TenantState};

/// Client-side facade for one remote service instance.
#[async_trait]
pub trait ApiChannel: LifecycleComponent {
    fn connection(&self) -> &ConnectionChannel;

    fn host(&self) -> &str {
        self.connection().host()
    }

    /// Poll readiness until Ready or `timeout` elapses.
    async fn wait_for_api_available(&self, timeout: Duration) -> Result<()> {
        wait_until_ready(self.connection(), timeout).await
    }
}

/// Poll `connection` every `poll_interval` until it reports Ready.
///
/// Never polls past the deadline: each probe and sleep is clipped to the time left.
pub async fn wait_until_ready(connection: &ConnectionChannel, timeout: Duration) -> Result<()> {
    let target = connection.address();
    let poll_interval = connection.settings().poll_interval;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let state = tokio::time::timeout(remaining, connection.probe())
            .await
            .unwrap_or(ConnectivityState::Connecting);

        match state {
            ConnectivityState::Ready => return Ok(()),
            ConnectivityState::Shutdown => {
                return Err(FleetError::ApiNotAvailable {
                    target,
                    reason: "channel is shut down".into(),
                })
            }
            state => tracing::debug!(address = %target, state = ?state, "API not ready yet"),
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(FleetError::ApiNotAvailable {
                target,
                reason: format!("not ready after {} ms", timeout.as_millis()),
            });
        }
        tokio::time::sleep(poll_interval.min(remaining)).await;
    }
}

/// JSON-over-HTTP API channel.
pub struct RemoteApiChannel {
    connection: ConnectionChannel,
}

impl RemoteApiChannel {
    pub fn new(connection: ConnectionChannel) -> Self {
        Self { connection }
    }

    /// Serialize `request`, dispatch it through the sync handle and decode the reply.
    pub async fn invoke<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.dispatch(method, request).await;
        metrics::record_remote_call(self.connection.service(), method, result.is_ok(), started.elapsed());
        if let Err(e) = &result {
            tracing::warn!(address = %self.connection.address(), method, error = %e, "Remote call failed");
        }
        result
    }

    async fn dispatch<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| FleetError::remote(method, e))?;
        let handle = self.connection.sync_handle().map_err(|e| FleetError::remote(method, e))?;
        let reply = handle.call(method, body).await.map_err(|e| FleetError::remote(method, e))?;
        serde_json::from_slice(&reply).map_err(|e| FleetError::remote(method, e))
    }
}

#[async_trait]
impl LifecycleComponent for RemoteApiChannel {
    fn core(&self) -> &Arc<ComponentCore> {
        self.connection.core()
    }

    async fn on_start(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.connection.on_start(monitor).await
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.connection.on_stop(monitor).await
    }
}

impl ApiChannel for RemoteApiChannel {
    fn connection(&self) -> &ConnectionChannel {
        &self.connection
    }
}

/// Tenant management reached over an API channel.
pub struct TenantManagementApiChannel {
    inner: RemoteApiChannel,
}

impl TenantManagementApiChannel {
    pub fn new(connection: ConnectionChannel) -> Self {
        Self {
            inner: RemoteApiChannel::new(connection),
        }
    }
}

#[async_trait]
impl LifecycleComponent for TenantManagementApiChannel {
    fn core(&self) -> &Arc<ComponentCore> {
        self.inner.core()
    }

    async fn on_start(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.inner.on_start(monitor).await
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.inner.on_stop(monitor).await
    }
}

impl ApiChannel for TenantManagementApiChannel {
    fn connection(&self) -> &ConnectionChannel {
        self.inner.connection()
    }
}

#[async_trait]
impl TenantManagement for TenantManagementApiChannel {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.inner.invoke("list_tenants", &json!({})).await
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.inner.invoke("get_tenant", &json!({ "id": id })).await
    }

    async fn update_desired_state(&self, id: &str, state: TenantState) -> Result<()> {
        let _: serde_json::Value = self
            .inner
            .invoke("update_desired_state", &json!({ "id": id, "desired_state": state }))
            .await?;
        Ok(())
    }
}
