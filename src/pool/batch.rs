// src/pool/batch.rs

//! Batch execution strategies.
//!
//! - [`BaseBatchExecutor`] runs each task of a batch once, in table order.
//! - [`RetryableBatchExecutor`] wraps another executor and re-runs the
//!   batch's failed tasks, after a fixed cooldown, up to `max_retries` times.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::pool::state::ExecutionState;
use crate::process::BoxFuture;
use crate::task::TaskStatus;

/// A group of task ids executed together by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_id: String,
    pub task_ids: Vec<String>,
    /// Belongs to the deferred queue.
    pub deferred: bool,
}

impl Batch {
    pub fn new(batch_id: impl Into<String>, task_ids: Vec<String>, deferred: bool) -> Self {
        Self {
            batch_id: batch_id.into(),
            task_ids,
            deferred,
        }
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Task executions beyond the first attempt.
    pub retried: usize,
    pub elapsed: Duration,
}

impl BatchStats {
    /// Fold a retry round into the stats of the original run. Tasks that
    /// succeed on retry move from `failed` to `completed`.
    pub fn merge_retry(&mut self, round: BatchStats) {
        self.completed += round.completed;
        self.failed = self.failed.saturating_sub(round.completed);
        self.retried += round.total;
        self.elapsed += round.elapsed;
    }
}

/// Pluggable batch execution.
pub trait BatchExecutor: Send + Sync + Debug {
    fn execute_batch<'a>(
        &'a self,
        batch: &'a Batch,
        state: &'a ExecutionState,
    ) -> BoxFuture<'a, BatchStats>;
}

/// Runs every pending task of a batch once, in order.
#[derive(Debug, Clone, Default)]
pub struct BaseBatchExecutor;

impl BatchExecutor for BaseBatchExecutor {
    fn execute_batch<'a>(
        &'a self,
        batch: &'a Batch,
        state: &'a ExecutionState,
    ) -> BoxFuture<'a, BatchStats> {
        Box::pin(async move {
            let batch_started = Instant::now();
            let mut stats = BatchStats::default();
            let ctx = state.context();

            for task_id in &batch.task_ids {
                if state.is_stopped() {
                    debug!(batch = %batch.batch_id, "pool stopped; abandoning rest of batch");
                    break;
                }

                let Some(task) = state.begin_task(task_id) else {
                    continue;
                };
                stats.total += 1;
                let started = Instant::now();

                let outcome = match task.validate() {
                    Ok(()) => state
                        .processor()
                        .process(&task, &ctx)
                        .await
                        .map_err(|e| format!("{e:#}")),
                    Err(err) => Err(err.to_string()),
                };

                if let Err(message) = &outcome {
                    warn!(
                        task = %task_id,
                        batch = %batch.batch_id,
                        attempt = task.retry_count + 1,
                        error = %message,
                        "task failed"
                    );
                }

                match state.settle_task(task_id, outcome, started.elapsed()) {
                    Some(TaskStatus::Completed) => stats.completed += 1,
                    Some(TaskStatus::Failed) => stats.failed += 1,
                    _ => {}
                }
            }

            stats.elapsed = batch_started.elapsed();
            stats
        })
    }
}

/// Adds bounded, fixed-cooldown retries on top of another executor.
#[derive(Debug, Clone)]
pub struct RetryableBatchExecutor {
    inner: Arc<dyn BatchExecutor>,
    max_retries: u32,
    cooldown: Duration,
}

impl RetryableBatchExecutor {
    pub fn new(inner: Arc<dyn BatchExecutor>, max_retries: u32, cooldown: Duration) -> Self {
        Self {
            inner,
            max_retries,
            cooldown,
        }
    }
}

impl BatchExecutor for RetryableBatchExecutor {
    fn execute_batch<'a>(
        &'a self,
        batch: &'a Batch,
        state: &'a ExecutionState,
    ) -> BoxFuture<'a, BatchStats> {
        Box::pin(async move {
            let mut stats = self.inner.execute_batch(batch, state).await;
            let mut round = 0u32;

            loop {
                if state.is_stopped() {
                    break;
                }
                let retry_ids = state.prepare_retry(&batch.task_ids, self.max_retries);
                if retry_ids.is_empty() {
                    break;
                }

                round += 1;
                info!(
                    batch = %batch.batch_id,
                    round,
                    tasks = retry_ids.len(),
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "retrying failed tasks"
                );
                tokio::time::sleep(self.cooldown).await;

                let retry = Batch::new(
                    format!("{}-retry{round}", batch.batch_id),
                    retry_ids,
                    batch.deferred,
                );
                let retry_stats = self.inner.execute_batch(&retry, state).await;
                stats.merge_retry(retry_stats);
            }

            // Stats from the table are authoritative once retries settle.
            let (completed, failed) = state.outcome_of(&batch.task_ids);
            stats.completed = completed;
            stats.failed = failed;
            stats
        })
    }
}
