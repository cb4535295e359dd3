//! API demultiplexer: a routed pool of channels to one logical peer service.
//!
//! # Data Flow
//! ```text
//! get_api_channel()          → load channel list (lock-free) → routing strategy
//! initialize_api_channel(h)  → queue → background worker:
//!                                create → initialize → start → copy-on-write add
//! remove_api_channel(h)      → copy-on-write remove → stop (best-effort)
//! topology update/snapshot   → initialize_api_channel / remove_api_channel
//! ```
//!
//! # Design Decisions
//! - Channel list is an `ArcSwap<Vec<_>>`: readers never wait on the add path
//! - Only the worker adds channels, so per-host uniqueness needs no extra lock
//! - Queued hosts are tracked; a remove while a channel is under construction cancels it
//! - A channel that fails initialize or start is discarded, never routed to

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::routing::{RoundRobin, RoutingStrategy};
use crate::channel::ApiChannel;
use crate::error::{FleetError, Result};
use crate::lifecycle::{
    start_nested, stop_best_effort, ComponentCore, ComponentKind, LifecycleComponent, LifecycleStatus,
    ProgressMonitor,
};
use crate::observability::metrics;

/// Builds a channel for one replica host.
pub trait ApiChannelFactory<C>: Send + Sync {
    fn create(&self, host: &str) -> Result<Arc<C>>;
}

impl<C, F> ApiChannelFactory<C> for F
where
    F: Fn(&str) -> Result<Arc<C>> + Send + Sync,
{
    fn create(&self, host: &str) -> Result<Arc<C>> {
        self(host)
    }
}

/// One running instance of a peer service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    pub service: String,
    pub hostname: String,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            hostname: hostname.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyChange {
    Added,
    Removed,
}

/// Notification delivered by the service topology collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    pub instance: ServiceInstance,
    pub change: TopologyChange,
}

/// Receiver of topology notifications.
#[async_trait]
pub trait TopologyListener: Send + Sync {
    async fn on_instance_topology_updated(&self, update: TopologyUpdate) -> Result<()>;

    /// Reconcile against the full set of instances currently known.
    async fn on_topology_snapshot(&self, instances: &[ServiceInstance]) -> Result<()>;
}

struct ChannelWorker {
    tx: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

/// State shared between the demux and its worker task.
struct DemuxShared<C> {
    core: Arc<ComponentCore>,
    target: String,
    channels: ArcSwap<Vec<Arc<C>>>,
    factory: Arc<dyn ApiChannelFactory<C>>,
    /// host → queued add requests not yet completed. Also guards inserts against removes.
    pending: Mutex<HashMap<String, usize>>,
}

impl<C: ApiChannel> DemuxShared<C> {
    fn contains(&self, host: &str) -> bool {
        self.channels.load().iter().any(|c| c.host() == host)
    }

    fn queue(&self, host: &str) {
        *self.pending.lock().entry(host.to_string()).or_default() += 1;
    }

    /// Complete one queued request for `host`. False when a remove cancelled it.
    fn settle(pending: &mut HashMap<String, usize>, host: &str) -> bool {
        match pending.get_mut(host) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    pending.remove(host);
                }
                true
            }
            None => false,
        }
    }

    fn accepting(&self) -> bool {
        matches!(self.core.status(), LifecycleStatus::Starting | LifecycleStatus::Started)
    }

    async fn add_channel(&self, host: String) {
        if self.contains(&host) {
            tracing::debug!(service = %self.target, host = %host, "Channel already present");
            Self::settle(&mut self.pending.lock(), &host);
            return;
        }

        let channel = match self.factory.create(&host) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(service = %self.target, host = %host, error = %e, "Unable to create API channel");
                Self::settle(&mut self.pending.lock(), &host);
                return;
            }
        };

        let monitor = ProgressMonitor::new(format!("initialize {} channel {}", self.target, host));
        if let Err(e) = start_nested(channel.as_ref(), &monitor).await {
            tracing::error!(
                service = %self.target,
                host = %host,
                error = %e,
                "API channel failed to initialize/start, discarding"
            );
            stop_best_effort(channel.as_ref(), &monitor).await;
            Self::settle(&mut self.pending.lock(), &host);
            return;
        }

        if !self.accepting() {
            tracing::info!(service = %self.target, host = %host, "Demultiplexer stopping, discarding new channel");
            stop_best_effort(channel.as_ref(), &monitor).await;
            return;
        }

        let mut inserted = false;
        let wanted = {
            let mut pending = self.pending.lock();
            let wanted = Self::settle(&mut pending, &host);
            if wanted {
                self.channels.rcu(|current| {
                    inserted = !current.iter().any(|c| c.host() == host);
                    let mut next = Vec::clone(current);
                    if inserted {
                        next.push(channel.clone());
                    }
                    next
                });
            }
            wanted
        };
        if !wanted {
            tracing::info!(service = %self.target, host = %host, "Host removed during construction, discarding channel");
        }

        if inserted {
            self.core.register_child(channel);
            let count = self.channels.load().len();
            metrics::record_channel_count(&self.target, count);
            tracing::info!(service = %self.target, host = %host, channels = count, "Added API channel");
        } else {
            stop_best_effort(channel.as_ref(), &monitor).await;
        }
    }
}

async fn run_channel_worker<C: ApiChannel>(mut rx: mpsc::UnboundedReceiver<String>, shared: Arc<DemuxShared<C>>) {
    while let Some(host) = rx.recv().await {
        shared.add_channel(host).await;
    }
    tracing::debug!(service = %shared.target, "Channel worker exiting");
}

/// Routed pool of API channels targeting one peer service.
pub struct ApiDemux<C: ApiChannel> {
    shared: Arc<DemuxShared<C>>,
    routing: Box<dyn RoutingStrategy<C>>,
    seed_hosts: Vec<String>,
    poll_interval: Duration,
    worker: Mutex<Option<ChannelWorker>>,
}

impl<C: ApiChannel> ApiDemux<C> {
    pub fn new(target: impl Into<String>, factory: impl ApiChannelFactory<C> + 'static) -> Self {
        let target = target.into();
        Self {
            shared: Arc::new(DemuxShared {
                core: ComponentCore::shared(format!("{target} demultiplexer"), ComponentKind::ApiDemux),
                target,
                channels: ArcSwap::from_pointee(Vec::new()),
                factory: Arc::new(factory),
                pending: Mutex::new(HashMap::new()),
            }),
            routing: Box::new(RoundRobin::new()),
            seed_hosts: Vec::new(),
            poll_interval: Duration::from_secs(2),
            worker: Mutex::new(None),
        }
    }

    pub fn with_routing(mut self, routing: Box<dyn RoutingStrategy<C>>) -> Self {
        self.routing = routing;
        self
    }

    /// Hosts submitted to the worker as soon as the demux starts.
    pub fn with_seed_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.seed_hosts = hosts.into_iter().collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn channels(&self) -> Vec<Arc<C>> {
        self.shared.channels.load().iter().cloned().collect()
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels.load().len()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.shared.channels.load().iter().map(|c| c.host().to_string()).collect()
    }

    /// Route to one live channel. Never blocks.
    pub fn get_api_channel(&self) -> Result<Arc<C>> {
        let channels = self.shared.channels.load();
        self.routing
            .choose(&channels)
            .ok_or_else(|| FleetError::NoChannelsAvailable(self.shared.target.clone()))
    }

    /// Poll until at least one channel is live.
    pub async fn wait_for_api_channel(&self, timeout: Duration) -> Result<Arc<C>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_api_channel() {
                Ok(channel) => return Ok(channel),
                Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
                Err(_) => {
                    tracing::debug!(service = %self.shared.target, "Waiting for an API channel");
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                }
            }
        }
    }

    /// Queue construction of a channel to `host` on the background worker.
    ///
    /// Returns once queued. Failures are logged by the worker and the channel is dropped.
    pub fn initialize_api_channel(&self, host: impl Into<String>) -> Result<()> {
        let host = host.into();
        let worker = self.worker.lock();
        let queued = match worker.as_ref() {
            Some(w) => {
                self.shared.queue(&host);
                let sent = w.tx.send(host.clone()).is_ok();
                if !sent {
                    DemuxShared::<C>::settle(&mut self.shared.pending.lock(), &host);
                }
                sent
            }
            None => false,
        };
        if queued {
            tracing::debug!(service = %self.shared.target, host = %host, "Queued API channel initialization");
            Ok(())
        } else {
            Err(FleetError::IllegalTransition {
                component: self.shared.core.name(),
                operation: "add a channel to",
                status: self.shared.core.status(),
            })
        }
    }

    /// Remove the channel to `host` and stop it. Returns the removed channel, if any.
    ///
    /// Also cancels queued or in-progress construction of a channel to `host`.
    pub async fn remove_api_channel(&self, host: &str) -> Option<Arc<C>> {
        let mut removed = None;
        {
            let mut pending = self.shared.pending.lock();
            if pending.remove(host).is_some() {
                tracing::debug!(service = %self.shared.target, host = %host, "Cancelled pending API channel");
            }
            self.shared.channels.rcu(|current| {
                removed = current.iter().find(|c| c.host() == host).cloned();
                current.iter().filter(|c| c.host() != host).cloned().collect::<Vec<_>>()
            });
        }

        let channel = removed?;
        self.shared.core.unregister_child(channel.id());
        let count = self.channel_count();
        metrics::record_channel_count(&self.shared.target, count);
        tracing::info!(service = %self.shared.target, host = %host, channels = count, "Removed API channel");

        let monitor = ProgressMonitor::new(format!("remove {} channel {}", self.shared.target, host));
        stop_best_effort(channel.as_ref(), &monitor).await;
        Some(channel)
    }

    fn targets(&self, instance: &ServiceInstance) -> bool {
        instance.service == self.shared.target
    }
}

#[async_trait]
impl<C: ApiChannel> TopologyListener for ApiDemux<C> {
    async fn on_instance_topology_updated(&self, update: TopologyUpdate) -> Result<()> {
        if !self.targets(&update.instance) {
            return Ok(());
        }
        match update.change {
            TopologyChange::Added => self.initialize_api_channel(update.instance.hostname),
            TopologyChange::Removed => {
                self.remove_api_channel(&update.instance.hostname).await;
                Ok(())
            }
        }
    }

    async fn on_topology_snapshot(&self, instances: &[ServiceInstance]) -> Result<()> {
        let live: Vec<&str> = instances
            .iter()
            .filter(|i| self.targets(i))
            .map(|i| i.hostname.as_str())
            .collect();

        for host in self.hosts() {
            if !live.contains(&host.as_str()) {
                self.remove_api_channel(&host).await;
            }
        }
        for host in live {
            if !self.shared.contains(host) {
                self.initialize_api_channel(host)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: ApiChannel> LifecycleComponent for ApiDemux<C> {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.shared.core
    }

    async fn on_start(&self, _monitor: &ProgressMonitor) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_channel_worker(rx, self.shared.clone()));
        for host in &self.seed_hosts {
            self.shared.queue(host);
            // Receiver is alive: the worker was just spawned.
            let _ = tx.send(host.clone());
        }
        *self.worker.lock() = Some(ChannelWorker { tx, handle });
        tracing::info!(service = %self.shared.target, seeds = self.seed_hosts.len(), "Demultiplexer started");
        Ok(())
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        // Dropping the sender lets the worker drain what is queued and exit.
        if let Some(worker) = self.worker.lock().take() {
            drop(worker.tx);
            if worker.handle.is_finished() {
                tracing::debug!(service = %self.shared.target, "Channel worker already finished");
            }
        }

        self.shared.pending.lock().clear();
        let channels = self.shared.channels.swap(Arc::new(Vec::new()));
        for channel in channels.iter() {
            stop_best_effort(channel.as_ref(), monitor).await;
        }
        self.shared.core.clear_children();
        metrics::record_channel_count(&self.shared.target, 0);
        Ok(())
    }
}
