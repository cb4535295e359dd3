//! API channel and demultiplexer integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use tenant_fleet::channel::{
    ApiChannel, ApiDemux, ChannelSettings, ConnectionChannel, RemoteApiChannel, ServiceInstance,
    TenantManagementApiChannel, TenantMetadata, TopologyChange, TopologyListener, TopologyUpdate,
};
use tenant_fleet::error::{FleetError, Result};
use tenant_fleet::lifecycle::{ComponentCore, LifecycleComponent, LifecycleStatus, ProgressMonitor};
use tenant_fleet::management::TenantManagement;
use tenant_fleet::resilience::{Backoff, RetryPolicy};
use tenant_fleet::tenant::{Tenant, TenantState};

mod common;
use common::{closed_port, eventually, monitor, start_programmable_backend, MockRequest};

const SERVICE: &str = "device-management";

fn settings() -> ChannelSettings {
    ChannelSettings {
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        retry: RetryPolicy::new(3, Backoff::new(Duration::from_millis(10), Duration::from_millis(50))),
    }
}

fn demux() -> ApiDemux<RemoteApiChannel> {
    ApiDemux::new(SERVICE, |host: &str| -> Result<Arc<RemoteApiChannel>> {
        Ok(Arc::new(RemoteApiChannel::new(ConnectionChannel::new(
            SERVICE,
            host,
            9000,
            settings(),
        ))))
    })
}

async fn started_demux(hosts: &[&str]) -> ApiDemux<RemoteApiChannel> {
    let demux = demux();
    demux.initialize(&monitor()).await.unwrap();
    demux.start(&monitor()).await.unwrap();
    for host in hosts {
        demux.initialize_api_channel(*host).unwrap();
    }
    let expected = hosts.len();
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == expected).await);
    demux
}

#[tokio::test]
async fn test_empty_demux_has_no_channels() {
    let demux = started_demux(&[]).await;
    match demux.get_api_channel() {
        Err(FleetError::NoChannelsAvailable(target)) => assert_eq!(target, SERVICE),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(channel) => panic!("routed to {}", channel.host()),
    }
}

#[tokio::test]
async fn test_round_robin_rotation_is_stable() {
    let demux = started_demux(&["host-a", "host-b", "host-c"]).await;

    let picked: Vec<String> = (0..10)
        .map(|_| demux.get_api_channel().unwrap().host().to_string())
        .collect();

    let distinct: HashSet<&String> = picked.iter().collect();
    assert_eq!(distinct.len(), 3);
    for (i, host) in picked.iter().enumerate() {
        assert_eq!(host, &picked[i % 3]);
    }
}

#[tokio::test]
async fn test_duplicate_host_is_ignored() {
    let demux = started_demux(&["host-a"]).await;
    demux.initialize_api_channel("host-a").unwrap();
    demux.initialize_api_channel("host-b").unwrap();

    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(demux.hosts(), vec!["host-a", "host-b"]);
}

#[tokio::test]
async fn test_remove_channel_stops_it() {
    let demux = started_demux(&["host-a", "host-b"]).await;
    let removed = demux.remove_api_channel("host-a").await.unwrap();

    assert_eq!(demux.hosts(), vec!["host-b"]);
    assert_eq!(removed.status(), LifecycleStatus::Stopped);
    assert!(demux.remove_api_channel("host-a").await.is_none());
}

#[tokio::test]
async fn test_failed_channel_is_discarded() {
    let demux = started_demux(&["host-a"]).await;
    demux.initialize_api_channel("bad host").unwrap();
    demux.initialize_api_channel("host-b").unwrap();

    // The worker is sequential, so host-b landing means "bad host" was handled.
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 2).await);
    assert_eq!(demux.hosts(), vec!["host-a", "host-b"]);
}

/// Channel whose start takes a while, leaving a window for topology changes.
struct SlowChannel {
    connection: ConnectionChannel,
}

#[async_trait]
impl LifecycleComponent for SlowChannel {
    fn core(&self) -> &Arc<ComponentCore> {
        self.connection.core()
    }

    async fn on_start(&self, monitor: &ProgressMonitor) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.connection.on_start(monitor).await
    }

    async fn on_stop(&self, monitor: &ProgressMonitor) -> Result<()> {
        self.connection.on_stop(monitor).await
    }
}

impl ApiChannel for SlowChannel {
    fn connection(&self) -> &ConnectionChannel {
        &self.connection
    }
}

#[tokio::test]
async fn test_remove_during_construction_cancels_channel() {
    let built: Arc<Mutex<Vec<Arc<SlowChannel>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = built.clone();
    let demux = ApiDemux::new(SERVICE, move |host: &str| -> Result<Arc<SlowChannel>> {
        let channel = Arc::new(SlowChannel {
            connection: ConnectionChannel::new(SERVICE, host, 9000, settings()),
        });
        log.lock().push(channel.clone());
        Ok(channel)
    });
    demux.initialize(&monitor()).await.unwrap();
    demux.start(&monitor()).await.unwrap();

    demux.initialize_api_channel("host-a").unwrap();
    assert!(eventually(Duration::from_secs(1), || built.lock().len() == 1).await);
    let discarded = built.lock()[0].clone();
    assert!(eventually(Duration::from_secs(1), || discarded.status() == LifecycleStatus::Starting).await);
    demux
        .on_instance_topology_updated(TopologyUpdate {
            instance: ServiceInstance::new(SERVICE, "host-a"),
            change: TopologyChange::Removed,
        })
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || discarded.status() == LifecycleStatus::Stopped).await);
    assert_eq!(demux.channel_count(), 0);

    // A later add of the same host goes through.
    demux.initialize_api_channel("host-a").unwrap();
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 1).await);
    assert_eq!(demux.hosts(), vec!["host-a"]);
}

#[tokio::test]
async fn test_initialize_before_start_is_rejected() {
    let demux = demux();
    let err = demux.initialize_api_channel("host-a").unwrap_err();
    assert!(matches!(err, FleetError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_stop_drops_all_channels() {
    let demux = started_demux(&["host-a", "host-b"]).await;
    let channels = demux.channels();

    demux.stop(&monitor()).await.unwrap();
    assert_eq!(demux.channel_count(), 0);
    assert!(channels.iter().all(|c| c.status() == LifecycleStatus::Stopped));
    assert!(demux.initialize_api_channel("host-c").is_err());
}

#[tokio::test]
async fn test_topology_updates_and_snapshots() {
    let demux = started_demux(&[]).await;

    demux
        .on_instance_topology_updated(TopologyUpdate {
            instance: ServiceInstance::new(SERVICE, "host-a"),
            change: TopologyChange::Added,
        })
        .await
        .unwrap();
    demux
        .on_instance_topology_updated(TopologyUpdate {
            instance: ServiceInstance::new("event-management", "host-z"),
            change: TopologyChange::Added,
        })
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 1).await);

    demux
        .on_topology_snapshot(&[ServiceInstance::new(SERVICE, "host-b"), ServiceInstance::new(SERVICE, "host-c")])
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 2).await);
    let hosts: HashSet<String> = demux.hosts().into_iter().collect();
    assert_eq!(hosts, HashSet::from(["host-b".to_string(), "host-c".to_string()]));

    demux
        .on_instance_topology_updated(TopologyUpdate {
            instance: ServiceInstance::new(SERVICE, "host-b"),
            change: TopologyChange::Removed,
        })
        .await
        .unwrap();
    assert_eq!(demux.hosts(), vec!["host-c"]);
}

#[tokio::test]
async fn test_seed_hosts_and_wait_for_channel() {
    let demux = demux().with_seed_hosts(["seed-1".to_string(), "seed-2".to_string()]);
    assert!(demux.wait_for_api_channel(Duration::from_millis(100)).await.is_err());

    demux.initialize(&monitor()).await.unwrap();
    demux.start(&monitor()).await.unwrap();
    demux.wait_for_api_channel(Duration::from_secs(2)).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || demux.channel_count() == 2).await);
}

#[tokio::test]
async fn test_wait_for_api_available_times_out() {
    let port = closed_port().await;
    let channel = RemoteApiChannel::new(ConnectionChannel::new(SERVICE, "127.0.0.1", port, settings()));
    channel.initialize(&monitor()).await.unwrap();
    channel.start(&monitor()).await.unwrap();

    let started = Instant::now();
    let err = channel.wait_for_api_available(Duration::from_millis(200)).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, FleetError::ApiNotAvailable { .. }));
    assert!(elapsed >= Duration::from_millis(190), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "returned after {elapsed:?}");
}

#[tokio::test]
async fn test_wait_for_api_available_when_listening() {
    let addr = start_programmable_backend(|_| async { (200, "{}".to_string()) }).await;
    let channel = RemoteApiChannel::new(ConnectionChannel::new(SERVICE, "127.0.0.1", addr.port(), settings()));
    channel.initialize(&monitor()).await.unwrap();
    channel.start(&monitor()).await.unwrap();

    channel.wait_for_api_available(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_typed_call_carries_tenant_metadata() {
    let seen: Arc<Mutex<Vec<MockRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let addr = start_programmable_backend(move |request: MockRequest| {
        let log = log.clone();
        async move {
            let path = request.path.clone();
            log.lock().push(request);
            match path.as_str() {
                "/tenant-management/list_tenants" => {
                    let tenants = vec![Tenant::new("t1", "One", "tok-1")];
                    (200, serde_json::to_string(&tenants).unwrap())
                }
                "/tenant-management/update_desired_state" => (200, "null".to_string()),
                _ => (404, String::new()),
            }
        }
    })
    .await;

    let connection = ConnectionChannel::multitenant(
        "tenant-management",
        "127.0.0.1",
        addr.port(),
        settings(),
        TenantMetadata {
            tenant_id: "t1".into(),
            auth_token: "tok-1".into(),
        },
    );
    let api = TenantManagementApiChannel::new(connection);
    api.initialize(&monitor()).await.unwrap();
    api.start(&monitor()).await.unwrap();

    let tenants = api.list_tenants().await.unwrap();
    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].id, "t1");

    api.update_desired_state("t1", TenantState::Stopped).await.unwrap();

    let requests = seen.lock().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("x-tenant-id"), Some("t1"));
    assert_eq!(requests[0].header("x-tenant-auth"), Some("tok-1"));
    let body: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(body["desired_state"], "stopped");
}

#[tokio::test]
async fn test_remote_failure_wraps_cause() {
    let addr = start_programmable_backend(|_| async { (500, "boom".to_string()) }).await;
    let api = TenantManagementApiChannel::new(ConnectionChannel::new(
        "tenant-management",
        "127.0.0.1",
        addr.port(),
        settings(),
    ));
    api.initialize(&monitor()).await.unwrap();
    api.start(&monitor()).await.unwrap();

    let err = api.list_tenants().await.unwrap_err();
    match err {
        FleetError::RemoteCallFailure { method, .. } => assert_eq!(method, "list_tenants"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unavailable_peer_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let addr = start_programmable_backend(move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, "Service Unavailable".to_string())
            } else {
                (200, "[]".to_string())
            }
        }
    })
    .await;

    let api = TenantManagementApiChannel::new(ConnectionChannel::new(
        "tenant-management",
        "127.0.0.1",
        addr.port(),
        settings(),
    ));
    api.initialize(&monitor()).await.unwrap();
    api.start(&monitor()).await.unwrap();

    assert!(api.list_tenants().await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_call_on_stopped_channel_fails() {
    let api = TenantManagementApiChannel::new(ConnectionChannel::new(
        "tenant-management",
        "127.0.0.1",
        9,
        settings(),
    ));
    let err = api.get_tenant("t1").await.unwrap_err();
    assert!(matches!(err, FleetError::RemoteCallFailure { .. }));
}
