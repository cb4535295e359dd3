//! Bounded-parallel fleet phases.
//!
//! A phase runs one operation per tenant engine with at most `width` running at once,
//! then waits for all of them up to the phase timeout. The timeout only ends the wait:
//! tasks already spawned keep running to completion.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::config::FleetSection;
use crate::observability::metrics;

/// Summary of one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport {
    pub phase: &'static str,
    pub submitted: usize,
    /// Operations that finished before the wait ended.
    pub completed: usize,
    pub elapsed: Duration,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FleetPhase {
    name: &'static str,
    width: usize,
    timeout: Duration,
}

impl FleetPhase {
    pub fn new(name: &'static str, width: usize, timeout: Duration) -> Self {
        Self {
            name,
            width: width.max(1),
            timeout,
        }
    }

    pub fn from_config(name: &'static str, config: &FleetSection) -> Self {
        Self::new(name, config.pool_width, config.operation_timeout())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `op` once per item. Failures are the operation's to handle; a panicking
    /// task is logged and counted as not completed.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, op: F) -> FleetReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.width));
        let completed = Arc::new(AtomicUsize::new(0));
        let op = Arc::new(op);

        tracing::info!(phase = self.name, tenants = items.len(), width = self.width, "Fleet phase starting");

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let permits = permits.clone();
                let completed = completed.clone();
                let op = op.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    op(item).await;
                    completed.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        let submitted = handles.len();

        let timed_out = match tokio::time::timeout(self.timeout, join_all(handles)).await {
            Ok(results) => {
                for panic in results.into_iter().filter_map(|r| r.err()) {
                    tracing::error!(phase = self.name, error = %panic, "Fleet task aborted");
                }
                false
            }
            Err(_) => {
                tracing::warn!(
                    phase = self.name,
                    timeout_secs = self.timeout.as_secs(),
                    "Fleet phase timed out, remaining tenant operations continue in background"
                );
                true
            }
        };

        let report = FleetReport {
            phase: self.name,
            submitted,
            completed: completed.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            timed_out,
        };
        metrics::record_fleet_phase(self.name, submitted, report.elapsed, timed_out);
        tracing::info!(
            phase = self.name,
            submitted,
            completed = report.completed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Fleet phase finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_width_bounds_concurrency() {
        let phase = FleetPhase::new("test", 5, Duration::from_secs(10));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        let report = phase
            .run((0..20).collect(), move |_: usize| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(report.submitted, 20);
        assert_eq!(report.completed, 20);
        assert!(!report.timed_out);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_timeout_stops_waiting_but_not_work() {
        let phase = FleetPhase::new("test", 2, Duration::from_millis(50));
        let finished = Arc::new(AtomicUsize::new(0));

        let f = finished.clone();
        let report = phase
            .run(vec![10u64, 300], move |delay| {
                let finished = f.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert!(report.timed_out);
        assert_eq!(report.completed, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }
}
