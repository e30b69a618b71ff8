// src/pool/progress.rs

use std::fmt::Debug;
use std::time::Duration;

use crate::task::{TaskCounts, TaskStatus};

/// Emitted after every task settles (and on every retry reset).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task_id: String,
    pub batch_id: Option<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Optional sink for live progress. Correctness never depends on it.
pub trait ProgressObserver: Send + Sync + Debug {
    fn on_task_event(&self, event: &TaskEvent);
}

/// Point-in-time progress of a pool run, read live from the task table.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub processing: usize,
    /// Settled tasks (completed + failed) over total, 0..=100.
    pub percent: f64,
    pub elapsed: Duration,
    /// `elapsed / completed * remaining`; `None` until something completes.
    pub eta: Option<Duration>,
}

impl Progress {
    pub fn from_counts(counts: TaskCounts, elapsed: Duration) -> Self {
        let settled = counts.completed + counts.failed;
        let percent = if counts.total == 0 {
            100.0
        } else {
            settled as f64 / counts.total as f64 * 100.0
        };
        let remaining = counts.pending + counts.processing;
        let eta = (counts.completed > 0)
            .then(|| elapsed.mul_f64(remaining as f64 / counts.completed as f64));

        Self {
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            pending: counts.pending,
            processing: counts.processing,
            percent,
            elapsed,
            eta,
        }
    }
}

/// Aggregate counters updated by workers as batches finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub retried_tasks: usize,
}
