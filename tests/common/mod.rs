//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tenant_fleet::config::FleetConfig;
use tenant_fleet::error::{FleetError, Result};
use tenant_fleet::lifecycle::{ComponentCore, ComponentKind, LifecycleComponent, ProgressMonitor};
use tenant_fleet::management::memory::{LocalTenantBindings, MemoryTenantManagement, MemoryUserManagement};
use tenant_fleet::management::{ServerBindings, TenantBindingResolver, TenantBindings};
use tenant_fleet::server::{FileResources, ServerOrchestrator};
use tenant_fleet::tenant::{Tenant, User};

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(MockRequest { path, headers, body })
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn monitor() -> ProgressMonitor {
    ProgressMonitor::new("test")
}

/// Tenants `t0..t{n}` with tokens `token-<i>`.
pub fn tenants(n: usize) -> Vec<Tenant> {
    (0..n)
        .map(|i| Tenant::new(format!("t{i}"), format!("Tenant {i}"), format!("token-{i}")))
        .collect()
}

/// Resolver that leaves device management unbound for the listed tenants.
pub fn failing_for(ids: &[&str]) -> Arc<dyn TenantBindingResolver> {
    let failing: HashSet<String> = ids.iter().map(|s| s.to_string()).collect();
    Arc::new(move |tenant: &Tenant| -> Result<TenantBindings> {
        let mut bindings = LocalTenantBindings.resolve(tenant)?;
        if failing.contains(&tenant.id) {
            bindings.device_management = None;
        }
        Ok(bindings)
    })
}

pub fn fleet_config(pool_width: usize) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.fleet.pool_width = pool_width;
    config.fleet.operation_timeout_secs = 30;
    config.monitoring.sample_interval_secs = 1;
    config
}

/// Orchestrator over in-memory backends, storing state under `data_dir`.
pub struct Fleet {
    pub server: ServerOrchestrator,
    pub tenants: Arc<MemoryTenantManagement>,
    pub users: Arc<MemoryUserManagement>,
}

impl Fleet {
    pub fn new(
        config: FleetConfig,
        tenants: Vec<Tenant>,
        users: Vec<User>,
        resolver: Arc<dyn TenantBindingResolver>,
        data_dir: &Path,
    ) -> Self {
        Self::with_auxiliary(config, tenants, users, resolver, data_dir, Vec::new())
    }

    pub fn with_auxiliary(
        config: FleetConfig,
        tenants: Vec<Tenant>,
        users: Vec<User>,
        resolver: Arc<dyn TenantBindingResolver>,
        data_dir: &Path,
        auxiliary: Vec<Arc<dyn LifecycleComponent>>,
    ) -> Self {
        let tenant_management = MemoryTenantManagement::new(tenants);
        let user_management = MemoryUserManagement::new(users);
        let bindings = ServerBindings {
            auxiliary,
            tenant_management: Some(tenant_management.clone()),
            user_management: Some(user_management.clone()),
            tenant_bindings: Some(resolver),
        };
        let server = ServerOrchestrator::new(config, bindings, Arc::new(FileResources::new(data_dir)));
        Self {
            server,
            tenants: tenant_management,
            users: user_management,
        }
    }

    pub async fn boot(&self) {
        let monitor = monitor();
        self.server.initialize(&monitor).await.unwrap();
        self.server.start(&monitor).await.unwrap();
    }
}

/// Base service whose start always fails.
pub struct BrokenService {
    core: Arc<ComponentCore>,
}

impl BrokenService {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            core: ComponentCore::shared(name, ComponentKind::Auxiliary),
        })
    }
}

#[async_trait]
impl LifecycleComponent for BrokenService {
    fn core(&self) -> &Arc<ComponentCore> {
        &self.core
    }

    async fn on_start(&self, _monitor: &ProgressMonitor) -> Result<()> {
        Err(FleetError::Resource("backing store unreachable".into()))
    }
}
