//! Advisory progress reporting for lifecycle operations.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Counts leaf steps executed under one lifecycle operation.
///
/// Purely informational. Nothing in the lifecycle model depends on the counts.
#[derive(Debug)]
pub struct ProgressMonitor {
    operation: String,
    total: AtomicUsize,
    completed: AtomicUsize,
    current: Mutex<Option<String>>,
}

impl ProgressMonitor {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Announce that `steps` more leaf steps are about to run.
    pub fn expect_steps(&self, steps: usize) {
        self.total.fetch_add(steps, Ordering::Relaxed);
    }

    /// Record one finished leaf step.
    pub fn tick(&self, message: &str) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed).max(completed);
        *self.current.lock() = Some(message.to_string());
        tracing::debug!(
            operation = %self.operation,
            step = %message,
            completed,
            total,
            "Lifecycle progress"
        );
    }

    /// `(completed, total)` leaf steps so far.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self.completed.load(Ordering::Relaxed);
        (completed, self.total.load(Ordering::Relaxed).max(completed))
    }

    pub fn current_step(&self) -> Option<String> {
        self.current.lock().clone()
    }
}
