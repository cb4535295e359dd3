//! Connection channel: one outbound connection to one `host:port`.
//!
//! # Responsibilities
//! - Build the HTTP client and the sync/async dispatch handles on start
//! - Track connectivity (probed on demand) and in-flight calls
//! - Attach tenant metadata to every call for the multitenant variant

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::ChannelConfig;
use crate::error::{FleetError, Result};
use crate::lifecycle::{ComponentCore, ComponentKind, LifecycleComponent, ProgressMonitor};
use crate::resilience::RetryPolicy;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const TENANT_AUTH_HEADER: &str = "x-tenant-auth";

/// Connectivity as last observed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

impl From<u8> for ConnectivityState {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnectivityState::Connecting,
            2 => ConnectivityState::Ready,
            3 => ConnectivityState::TransientFailure,
            4 => ConnectivityState::Shutdown,
            _ => ConnectivityState::Idle,
        }
    }
}

/// Timeouts and retry behavior for one channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Readiness poll interval for `wait_for_api_available`.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl ChannelSettings {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry: RetryPolicy::from_config(&config.retries),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from_config(&ChannelConfig::default())
    }
}

/// Tenant identity sent with every call on a multitenant channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantMetadata {
    pub tenant_id: String,
    pub auth_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel to {0} is not started")]
    NotConnected(String),

    #[error("invalid call address: {0}")]
    Address(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("remote returned status {0}")]
    Status(u16),
}

impl TransportError {
    /// Failures worth retrying: the peer was unreachable or asked us to back off.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Request(e) => e.is_connect() || e.is_timeout(),
            TransportError::Status(code) => *code == 503,
            _ => false,
        }
    }
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Request/response dispatch: the caller waits for the reply.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    client: reqwest::Client,
    base: Url,
    service: String,
    metadata: Option<TenantMetadata>,
    retry: RetryPolicy,
    in_flight: Arc<AtomicUsize>,
}

impl SyncHandle {
    /// POST `body` to `<base>/<service>/<method>` and return the reply body.
    pub async fn call(&self, method: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, TransportError> {
        let url = self.base.join(&format!("{}/{}", self.service, method))?;
        let _guard = InFlightGuard::new(&self.in_flight);

        self.retry
            .run(
                |_| {
                    let request = self.request(url.clone(), body.clone());
                    async move {
                        let response = request.send().await?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(TransportError::Status(status.as_u16()));
                        }
                        Ok::<Vec<u8>, TransportError>(response.bytes().await?.to_vec())
                    }
                },
                TransportError::is_transient,
            )
            .await
    }

    fn request(&self, url: Url, body: Vec<u8>) -> reqwest::RequestBuilder {
        let mut request = self.client.post(url).header(CONTENT_TYPE, "application/json").body(body);
        if let Some(metadata) = &self.metadata {
            request = request
                .header(TENANT_ID_HEADER, metadata.tenant_id.as_str())
                .header(TENANT_AUTH_HEADER, metadata.auth_token.as_str());
        }
        request
    }
}

/// Background dispatch: the call runs on its own task.
#[derive(Debug, Clone)]
pub struct AsyncHandle {
    inner: SyncHandle,
}

impl AsyncHandle {
    pub fn dispatch(&self, method: &str, body: Vec<u8>) -> JoinHandle<std::result::Result<Vec<u8>, TransportError>> {
        let inner = self.inner.clone();
        let method = method.to_string();
        tokio::spawn(async move { inner.call(&method, body).await })
    }
}

/// One outbound connection to a peer replica.
pub struct ConnectionChannel {
    core: Arc<ComponentCore>,
    service: String,
    host: String,
    port: u16,
    settings: ChannelSettings,
    metadata: Option<TenantMetadata>,
    connectivity: AtomicU8,
    in_flight: Arc<AtomicUsize>,
    handles: RwLock<Option<(SyncHandle, AsyncHandle)>>,
}

impl ConnectionChannel {
    pub fn new(service: impl Into<String>, host: impl Into<String>, port: u16, settings: ChannelSettings) -> Self {
        let service = service.into();
        let host = host.into();
        Self {
            core: ComponentCore::shared(format!("{service} channel ({host}:{port})"), ComponentKind::Channel),
            service,
            host,
            port,
            settings,
            metadata: None,
            connectivity: AtomicU8::new(ConnectivityState::Idle as u8),
            in_flight: Arc::new(AtomicUsize::new(0)),
            handles: RwLock::new(None),
        }
    }

    /// Channel that sends `metadata` with every call.
    pub fn multitenant(
        service: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        settings: ChannelSettings,
        metadata: TenantMetadata,
    ) -> Self {
        let mut channel = Self::new(service, host, port, settings);
        channel.metadata = Some(metadata);
        channel
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn metadata(&self) -> Option<&TenantMetadata> {
        self.metadata.as_ref()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        ConnectivityState::from(self.connectivity.load(Ordering::Relaxed))
    }

    fn set_connectivity(&self, state: ConnectivityState) {
        self.connectivity.store(state as u8, Ordering::Relaxed);
    }

    /// Selectable for routing unless known to be failing or shut down.
    pub fn is_available(&self) -> bool {
        !matches!(
            self.connectivity(),
            ConnectivityState::TransientFailure | ConnectivityState::Shutdown
        )
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count a call against this channel until the guard drops.
    pub fn track_call(&self) -> InFlightGuard {
        InFlightGuard::new(&self.in_flight)
    }

    pub fn sync_handle(&self) -> std::result::Result<SyncHandle, TransportError> {
        self.handles
            .read()
            .as_ref()
            .map(|(sync, _)| sync.clone())
            .ok_or_else(|| TransportError::NotConnected(self.address()))
    }

    pub fn async_handle(&self) -> std::result::Result<AsyncHandle, TransportError> {
        self.handles
            .read()
            .as_ref()
            .map(|(_, handle)| handle.clone())
            .ok_or_else(|| TransportError::NotConnected(self.address()))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Attempt a connection and record the resulting state.
    ///
    /// A channel that was never started stays Idle; a stopped one reports Shutdown.
    pub async fn probe(&self) -> ConnectivityState {
        if self.handles.read().is_none() {
            return self.connectivity();
        }
        if self.connectivity() != ConnectivityState::Ready {
            self.set_connectivity(ConnectivityState::Connecting);
        }

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let state = match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(_)) => ConnectivityState::Ready,
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address(), error = %e, "Channel probe failed");
                ConnectivityState::TransientFailure
            }
            Err(_) => {
                tracing::debug!(address = %self.address(), "Channel probe timed out");
                ConnectivityState::TransientFailure
            }
        };

        // Stopped while probing.
        if self.handles.read().is_none() {
            return self.connectivity();
        }
        self.set_connectivity(state);
        state
    }
}

#[async_trait]
impl LifecycleComponent for ConnectionChannel {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    async fn on_start(&self, _monitor: &ProgressMonitor) -> Result<()> {
        let base = Url::parse(&format!("http://{}:{}/", self.host, self.port))
            .map_err(|e| FleetError::configuration(format!("invalid channel address '{}': {e}", self.address())))?;
        let client = reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .build()
            .map_err(|e| FleetError::Resource(format!("unable to build client for {}: {e}", self.address())))?;

        let sync = SyncHandle {
            client,
            base,
            service: self.service.clone(),
            metadata: self.metadata.clone(),
            retry: self.settings.retry,
            in_flight: self.in_flight.clone(),
        };
        let handle = AsyncHandle { inner: sync.clone() };
        *self.handles.write() = Some((sync, handle));
        self.set_connectivity(ConnectivityState::Idle);

        tracing::debug!(service = %self.service, address = %self.address(), tenant = ?self.metadata.as_ref().map(|m| &m.tenant_id), "Channel started");
        Ok(())
    }

    async fn on_stop(&self, _monitor: &ProgressMonitor) -> Result<()> {
        self.handles.write().take();
        self.set_connectivity(ConnectivityState::Shutdown);
        Ok(())
    }
}
