//! Periodic self-monitoring and runtime reporting.
//!
//! # Responsibilities
//! - Sample process memory and uptime on a fixed interval
//! - Keep a bounded history of samples for runtime info queries

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::lifecycle::{LifecycleStatus, Shutdown};
use crate::observability::metrics;

/// One point-in-time reading of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSample {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Resident memory of this process, 0 when the platform does not report it.
    pub memory_bytes: u64,
}

impl RuntimeSample {
    pub fn capture(started_at: Instant, system: &mut System) -> Self {
        let memory_bytes = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                system.refresh_process(pid);
                system.process(pid).map(|p| p.memory())
            })
            .unwrap_or(0);

        Self {
            timestamp: Utc::now(),
            uptime_secs: started_at.elapsed().as_secs(),
            memory_bytes,
        }
    }
}

/// Runtime view of the server returned to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub node_id: Option<Uuid>,
    pub instance_id: String,
    pub version: String,
    pub status: LifecycleStatus,
    pub uptime_secs: u64,
    pub memory: RuntimeSample,
    pub engines_by_status: HashMap<LifecycleStatus, usize>,
    pub history: Option<Vec<RuntimeSample>>,
}

struct SamplerTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Background task recording [`RuntimeSample`]s.
pub struct RuntimeSampler {
    config: MonitoringConfig,
    started_at: Instant,
    history: Arc<Mutex<VecDeque<RuntimeSample>>>,
    task: Mutex<Option<SamplerTask>>,
}

impl RuntimeSampler {
    pub fn new(config: MonitoringConfig, started_at: Instant) -> Self {
        Self {
            config,
            started_at,
            history: Arc::new(Mutex::new(VecDeque::new())),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false)
    }

    /// Spawn the sampling loop. No-op when disabled or already running.
    pub fn start(&self) {
        if !self.config.enabled {
            tracing::info!("Runtime monitoring disabled");
            return;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let shutdown = Shutdown::new();
        let mut stop = shutdown.subscribe();
        let history = self.history.clone();
        let capacity = self.config.history_size;
        let started_at = self.started_at;
        let interval = Duration::from_secs(self.config.sample_interval_secs);

        let handle = tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = RuntimeSample::capture(started_at, &mut system);
                        metrics::record_runtime_sample(sample.memory_bytes, Duration::from_secs(sample.uptime_secs));
                        let mut history = history.lock();
                        if history.len() >= capacity {
                            history.pop_front();
                        }
                        history.push_back(sample);
                    }
                    _ = stop.recv() => {
                        tracing::debug!("Runtime sampler exiting");
                        break;
                    }
                }
            }
        });

        tracing::info!(interval_secs = self.config.sample_interval_secs, "Runtime sampler started");
        *task = Some(SamplerTask { shutdown, handle });
    }

    /// Signal the loop to exit. History is kept.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            if task.shutdown.trigger() == 0 {
                task.handle.abort();
            }
        }
    }

    /// Take a fresh sample outside the loop.
    pub fn sample_now(&self) -> RuntimeSample {
        RuntimeSample::capture(self.started_at, &mut System::new())
    }

    pub fn history(&self) -> Vec<RuntimeSample> {
        self.history.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(history_size: usize) -> MonitoringConfig {
        MonitoringConfig {
            enabled: true,
            sample_interval_secs: 1,
            history_size,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let sampler = RuntimeSampler::new(config(3), Instant::now());
        sampler.start();
        assert!(sampler.is_running());

        for _ in 0..6 {
            time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(sampler.history().len(), 3);

        sampler.stop();
        assert!(!sampler.is_running());
    }

    #[tokio::test]
    async fn test_disabled_sampler_never_runs() {
        let mut disabled = config(3);
        disabled.enabled = false;
        let sampler = RuntimeSampler::new(disabled, Instant::now());
        sampler.start();
        assert!(!sampler.is_running());
        assert!(sampler.history().is_empty());
    }
}
