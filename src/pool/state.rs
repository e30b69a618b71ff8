// src/pool/state.rs

//! Shared state of one pool run: the live task table, status channel,
//! counters and the batch queues.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::pool::batch::{Batch, BatchStats};
use crate::pool::progress::{PoolStats, ProgressObserver, TaskEvent};
use crate::process::{ProcessContext, ProcessOutput, Processor};
use crate::task::{Task, TaskCounts, TaskStatus, TaskTable};

/// Lifecycle of a [`WorkerPool`](crate::pool::WorkerPool).
///
/// `Idle → Running → {Paused ⇄ Running} → {Completed | Stopped | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl PoolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PoolStatus::Completed | PoolStatus::Stopped | PoolStatus::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, PoolStatus::Running | PoolStatus::Paused)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolStatus::Idle => "idle",
            PoolStatus::Running => "running",
            PoolStatus::Paused => "paused",
            PoolStatus::Completed => "completed",
            PoolStatus::Stopped => "stopped",
            PoolStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything workers share during one run.
///
/// The task table is the only cross-worker mutable resource. Splitting
/// guarantees one task per cell, and each task id lives in exactly one batch,
/// so every row has a single writer; the mutex only protects the `Vec`.
pub struct ExecutionState {
    tasks: Mutex<TaskTable>,
    processor: Arc<dyn Processor>,
    base_context: ProcessContext,
    phase_context: RwLock<ProcessContext>,
    observer: Option<Arc<dyn ProgressObserver>>,
    stats: Mutex<PoolStats>,
    status: Arc<watch::Sender<PoolStatus>>,
    started: Instant,
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("stage", &self.base_context.stage_id)
            .field("status", &self.status())
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

impl ExecutionState {
    pub fn new(
        tasks: TaskTable,
        processor: Arc<dyn Processor>,
        context: ProcessContext,
        observer: Option<Arc<dyn ProgressObserver>>,
        status: Arc<watch::Sender<PoolStatus>>,
    ) -> Self {
        let phase_context = context.with_visible_tasks(tasks.iter());
        Self {
            tasks: Mutex::new(tasks),
            processor,
            base_context: context,
            phase_context: RwLock::new(phase_context),
            observer,
            stats: Mutex::new(PoolStats::default()),
            status,
            started: Instant::now(),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, TaskTable> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == PoolStatus::Stopped
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Block while paused. Returns `true` if the pool is running afterwards,
    /// `false` if it was stopped or finished.
    pub async fn wait_until_runnable(&self) -> bool {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|s| *s != PoolStatus::Paused).await {
            Ok(status) => *status == PoolStatus::Running,
            Err(_) => false,
        }
    }

    /// Context for tasks in the current phase.
    pub fn context(&self) -> ProcessContext {
        self.phase_context
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every task completed so far visible to the next phase.
    pub fn refresh_context(&self) {
        let ctx = {
            let tasks = self.lock_tasks();
            self.base_context.with_visible_tasks(tasks.iter())
        };
        *self.phase_context.write().unwrap_or_else(|e| e.into_inner()) = ctx;
    }

    /// Move a pending task to `Processing` and hand back a copy of it.
    pub fn begin_task(&self, task_id: &str) -> Option<Task> {
        let mut tasks = self.lock_tasks();
        let task = tasks.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            debug!(task = %task_id, status = %task.status, "skipping task that is not pending");
            return None;
        }
        task.mark_processing();
        Some(task.clone())
    }

    /// Record the outcome of one task and notify the observers.
    pub fn settle_task(
        &self,
        task_id: &str,
        outcome: std::result::Result<ProcessOutput, String>,
        elapsed: Duration,
    ) -> Option<TaskStatus> {
        let settled = {
            let mut tasks = self.lock_tasks();
            let task = tasks.get_mut(task_id)?;
            match outcome {
                Ok(output) => task.complete(output.text, output.confidence, elapsed),
                Err(message) => task.fail(message, elapsed),
            }
            task.clone()
        };
        self.notify(&settled);
        Some(settled.status)
    }

    /// Reset the batch's failed tasks that still have retries left.
    pub fn prepare_retry(&self, task_ids: &[String], max_retries: u32) -> Vec<String> {
        let reset: Vec<Task> = {
            let mut tasks = self.lock_tasks();
            task_ids
                .iter()
                .filter_map(|id| {
                    let task = tasks.get_mut(id)?;
                    if task.status == TaskStatus::Failed && task.retry_count < max_retries {
                        task.reset_for_retry();
                        Some(task.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for task in &reset {
            self.notify(task);
        }
        reset.into_iter().map(|t| t.task_id).collect()
    }

    /// `(completed, failed)` among the given tasks.
    pub fn outcome_of(&self, task_ids: &[String]) -> (usize, usize) {
        let tasks = self.lock_tasks();
        task_ids
            .iter()
            .filter_map(|id| tasks.get(id))
            .fold((0, 0), |(c, f), t| match t.status {
                TaskStatus::Completed => (c + 1, f),
                TaskStatus::Failed => (c, f + 1),
                _ => (c, f),
            })
    }

    pub fn record_batch(&self, stats: &BatchStats) {
        let mut agg = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if stats.failed > 0 {
            agg.failed_batches += 1;
        } else {
            agg.completed_batches += 1;
        }
        agg.completed_tasks += stats.completed;
        agg.failed_tasks += stats.failed;
        agg.retried_tasks += stats.retried;
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self) -> TaskCounts {
        self.lock_tasks().counts()
    }

    pub fn tasks_snapshot(&self) -> TaskTable {
        self.lock_tasks().clone()
    }

    /// Put tasks interrupted by a stop back to `Pending`.
    pub fn reset_in_flight(&self) -> usize {
        self.lock_tasks().reset_in_flight()
    }

    // Called outside the table lock.
    fn notify(&self, task: &Task) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_task_event(&event_for(task));
        }
        self.base_context.notify_task(task);
    }
}

fn event_for(task: &Task) -> TaskEvent {
    TaskEvent {
        task_id: task.task_id.clone(),
        batch_id: task.batch_id.clone(),
        status: task.status,
        result: task.result.clone(),
        error: task.error_message.clone(),
        retry_count: task.retry_count,
    }
}

/// Result of one dequeue attempt.
#[derive(Debug)]
pub enum Dequeue {
    Batch(Batch),
    /// Nothing arrived within the timeout; the queue is still open.
    TimedOut,
    /// Queue closed and drained.
    Empty,
}

/// Pre-filled, closed FIFO of batches shared by the workers of one phase.
#[derive(Debug)]
pub struct BatchQueue {
    rx: tokio::sync::Mutex<mpsc::Receiver<Batch>>,
    len: usize,
}

impl BatchQueue {
    pub fn filled(batches: Vec<Batch>) -> Self {
        let len = batches.len();
        let (tx, rx) = mpsc::channel(len.max(1));
        for batch in batches {
            // Capacity equals the number of batches, so this cannot fill up.
            if let Err(err) = tx.try_send(batch) {
                debug!(error = %err, "dropping batch that did not fit the queue");
            }
        }
        // Dropping the sender closes the channel: `recv` yields `None` once
        // the last batch is taken.
        drop(tx);
        Self {
            rx: tokio::sync::Mutex::new(rx),
            len,
        }
    }

    /// Number of batches the queue was filled with.
    pub fn initial_len(&self) -> usize {
        self.len
    }

    pub async fn dequeue(&self, wait: Duration) -> Dequeue {
        let next = tokio::time::timeout(wait, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match next {
            Ok(Some(batch)) => Dequeue::Batch(batch),
            Ok(None) => Dequeue::Empty,
            Err(_) => Dequeue::TimedOut,
        }
    }

    /// Discard everything still queued. Returns how many batches were dropped.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
