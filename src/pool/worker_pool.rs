// src/pool/worker_pool.rs

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::checkpoint::TaskStore;
use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pool::batch::{BaseBatchExecutor, Batch, BatchExecutor, RetryableBatchExecutor};
use crate::pool::config::PoolConfig;
use crate::pool::progress::{PoolStats, Progress, ProgressObserver};
use crate::pool::state::{BatchQueue, Dequeue, ExecutionState, PoolStatus};
use crate::process::{merge_results, ProcessContext, Processor};
use crate::task::{TaskStatus, TaskTable};

/// Where a finished run's task table is persisted, if anywhere.
#[derive(Debug, Clone)]
struct TaskSink {
    store: Arc<dyn TaskStore>,
    session_id: String,
}

/// Everything that belongs to the run currently owned by the pool.
struct ActiveRun {
    state: Arc<ExecutionState>,
    primary: Arc<BatchQueue>,
    deferred: Arc<BatchQueue>,
    monitor: Option<JoinHandle<()>>,
    final_state: Arc<Mutex<Option<DataState>>>,
}

/// Final product of a pool run.
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    pub status: PoolStatus,
    /// Merged dataset; only present when the run completed.
    pub state: Option<DataState>,
    pub tasks: TaskTable,
    pub stats: PoolStats,
}

/// Bounded-concurrency executor of task batches.
///
/// A run has two phases. Primary batches are consumed by up to
/// `max_workers` workers; once they have all finished, deferred batches
/// (tasks whose operation needs another task's committed result) are
/// consumed by a fresh set of workers. Only then is the run reported as
/// completed.
///
/// Control:
/// - [`pause_execution`](Self::pause_execution) stops dequeuing; in-flight
///   batches finish.
/// - [`resume_execution`](Self::resume_execution) lifts the pause.
/// - [`stop_execution`](Self::stop_execution) aborts in-flight workers and
///   discards both queues. Already settled results are kept.
pub struct WorkerPool {
    config: PoolConfig,
    status: Arc<watch::Sender<PoolStatus>>,
    observer: Option<Arc<dyn ProgressObserver>>,
    executor: Option<Arc<dyn BatchExecutor>>,
    sink: Option<TaskSink>,
    active: Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (status, _rx) = watch::channel(PoolStatus::Idle);
        Self {
            config,
            status: Arc::new(status),
            observer: None,
            executor: None,
            sink: None,
            active: Mutex::new(None),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the default retrying executor.
    pub fn with_executor(mut self, executor: Arc<dyn BatchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Persist the final task table of every run under `session_id`.
    pub fn with_task_store(mut self, store: Arc<dyn TaskStore>, session_id: impl Into<String>) -> Self {
        self.sink = Some(TaskSink {
            store,
            session_id: session_id.into(),
        });
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.status.subscribe()
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: PoolStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(from = %previous, to = %status, "worker pool status changed");
        }
    }

    /// Start executing the pending tasks of `tasks` against `state`.
    ///
    /// Must be called from inside a Tokio runtime. Fails with
    /// [`SheetflowError::AlreadyRunning`] if a run is active.
    pub fn start_execution(
        &self,
        state: DataState,
        mut tasks: TaskTable,
        processor: Arc<dyn Processor>,
        context: ProcessContext,
    ) -> Result<()> {
        let mut active = self.lock_active();
        if self.status().is_active() {
            return Err(SheetflowError::AlreadyRunning);
        }
        tasks.validate()?;

        let (primary, deferred) = partition_batches(&tasks, &self.config);
        // Deferred tasks carry the id of the batch they actually run in.
        for batch in &deferred {
            for id in &batch.task_ids {
                if let Some(task) = tasks.get_mut(id) {
                    task.batch_id = Some(batch.batch_id.clone());
                }
            }
        }
        info!(
            stage = %context.stage_id,
            tasks = tasks.len(),
            primary_batches = primary.len(),
            deferred_batches = deferred.len(),
            max_workers = self.config.max_workers,
            "starting worker pool"
        );

        let exec_state = Arc::new(ExecutionState::new(
            tasks,
            processor,
            context,
            self.observer.clone(),
            Arc::clone(&self.status),
        ));
        let primary = Arc::new(BatchQueue::filled(primary));
        let deferred = Arc::new(BatchQueue::filled(deferred));
        let final_state = Arc::new(Mutex::new(None));

        let executor: Arc<dyn BatchExecutor> = match self.executor.as_ref() {
            Some(custom) => Arc::clone(custom),
            None => Arc::new(RetryableBatchExecutor::new(
                Arc::new(BaseBatchExecutor),
                self.config.max_retries,
                self.config.retry_cooldown,
            )),
        };

        self.set_status(PoolStatus::Running);

        let monitor = Monitor {
            config: self.config.clone(),
            state: Arc::clone(&exec_state),
            primary: Arc::clone(&primary),
            deferred: Arc::clone(&deferred),
            executor,
            base: state,
            final_state: Arc::clone(&final_state),
            sink: self.sink.clone(),
            status: Arc::clone(&self.status),
        };
        let handle = tokio::spawn(monitor.run());

        *active = Some(ActiveRun {
            state: exec_state,
            primary,
            deferred,
            monitor: Some(handle),
            final_state,
        });
        Ok(())
    }

    /// Stop dequeuing new batches. Returns `false` if the pool was not running.
    pub fn pause_execution(&self) -> bool {
        if self.status() != PoolStatus::Running {
            return false;
        }
        self.set_status(PoolStatus::Paused);
        true
    }

    /// Lift a pause. Returns `false` if the pool was not paused.
    pub fn resume_execution(&self) -> bool {
        if self.status() != PoolStatus::Paused {
            return false;
        }
        self.set_status(PoolStatus::Running);
        true
    }

    /// Cancel every in-flight worker and discard both queues.
    ///
    /// Tasks that were mid-flight go back to `Pending`; settled tasks keep
    /// their results. Returns `false` if no run was active.
    pub async fn stop_execution(&self) -> bool {
        if !self.status().is_active() {
            return false;
        }
        self.set_status(PoolStatus::Stopped);

        let (monitor, primary, deferred, state) = {
            let mut active = self.lock_active();
            let Some(run) = active.as_mut() else {
                return false;
            };
            (
                run.monitor.take(),
                Arc::clone(&run.primary),
                Arc::clone(&run.deferred),
                Arc::clone(&run.state),
            )
        };

        if let Some(handle) = monitor {
            // Aborting the monitor drops its JoinSets, which aborts workers.
            handle.abort();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "monitor ended abnormally while stopping");
                }
            }
        }

        let dropped = primary.drain().await + deferred.drain().await;
        let reset = state.reset_in_flight();
        info!(dropped_batches = dropped, reset_tasks = reset, "worker pool stopped");
        true
    }

    /// Wait until the current run reaches a terminal status.
    pub async fn wait(&self) -> Result<PoolOutcome> {
        let mut rx = self.status.subscribe();
        rx.wait_for(|s| s.is_terminal() || *s == PoolStatus::Idle)
            .await
            .map_err(|e| SheetflowError::Other(anyhow::anyhow!("status channel closed: {e}")))?;

        let (state, final_state) = {
            let active = self.lock_active();
            let run = active
                .as_ref()
                .ok_or_else(|| SheetflowError::Other(anyhow::anyhow!("no run was started")))?;
            (Arc::clone(&run.state), Arc::clone(&run.final_state))
        };

        let merged = final_state.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(PoolOutcome {
            status: self.status(),
            state: merged,
            tasks: state.tasks_snapshot(),
            stats: state.stats(),
        })
    }

    /// Live progress, computed from the task table.
    pub fn progress(&self) -> Progress {
        let active = self.lock_active();
        match active.as_ref() {
            Some(run) => Progress::from_counts(run.state.counts(), run.state.elapsed()),
            None => Progress::from_counts(Default::default(), Default::default()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.lock_active()
            .as_ref()
            .map(|run| run.state.stats())
            .unwrap_or_default()
    }

    /// Copy of the live task table of the current (or last) run.
    pub fn snapshot_tasks(&self) -> TaskTable {
        self.lock_active()
            .as_ref()
            .map(|run| run.state.tasks_snapshot())
            .unwrap_or_default()
    }
}

/// Split pending tasks into primary and deferred batches.
///
/// A batch mixing deferred and non-deferred operations is split in two; the
/// deferred half is renamed `{batch_id}-deferred`. Batch order follows the
/// table.
pub fn partition_batches(tasks: &TaskTable, config: &PoolConfig) -> (Vec<Batch>, Vec<Batch>) {
    let mut order: Vec<(String, bool)> = Vec::new();
    let mut groups: BTreeMap<(String, bool), Vec<String>> = BTreeMap::new();

    for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
        let batch_id = task
            .batch_id
            .clone()
            .unwrap_or_else(|| format!("{}-unbatched", task.target_lang));
        let key = (batch_id, config.is_deferred(&task.operation));
        let entry = groups.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(task.task_id.clone());
    }

    let mixed: HashSet<String> = groups
        .keys()
        .filter(|(id, is_deferred)| *is_deferred && groups.contains_key(&(id.clone(), false)))
        .map(|(id, _)| id.clone())
        .collect();

    let mut primary = Vec::new();
    let mut deferred = Vec::new();
    for key in order {
        let Some(ids) = groups.remove(&key) else {
            continue;
        };
        match key {
            (batch_id, true) => {
                let batch_id = if mixed.contains(&batch_id) {
                    format!("{batch_id}-deferred")
                } else {
                    batch_id
                };
                deferred.push(Batch::new(batch_id, ids, true));
            }
            (batch_id, false) => primary.push(Batch::new(batch_id, ids, false)),
        }
    }
    (primary, deferred)
}

/// Owns the worker sets of one run and finalises it.
struct Monitor {
    config: PoolConfig,
    state: Arc<ExecutionState>,
    primary: Arc<BatchQueue>,
    deferred: Arc<BatchQueue>,
    executor: Arc<dyn BatchExecutor>,
    base: DataState,
    final_state: Arc<Mutex<Option<DataState>>>,
    sink: Option<TaskSink>,
    status: Arc<watch::Sender<PoolStatus>>,
}

impl Monitor {
    async fn run(self) {
        let primary_batches = self.primary.initial_len();
        let deferred_batches = self.deferred.initial_len();

        let mut workers = self.spawn_workers("primary", &self.primary, primary_batches);
        drain_join_set(&mut workers).await;

        if self.state.is_stopped() {
            return;
        }

        if deferred_batches > 0 {
            info!(deferred_batches, "primary queue drained; starting deferred workers");
            self.state.refresh_context();
            let mut workers = self.spawn_workers("deferred", &self.deferred, deferred_batches);
            drain_join_set(&mut workers).await;

            if self.state.is_stopped() {
                return;
            }
        }

        self.finish();
    }

    fn spawn_workers(&self, phase: &'static str, queue: &Arc<BatchQueue>, batches: usize) -> JoinSet<()> {
        let count = self.config.max_workers.max(1).min(batches);
        let mut set = JoinSet::new();
        for worker_id in 0..count {
            set.spawn(run_worker(
                worker_id,
                phase,
                Arc::clone(queue),
                Arc::clone(&self.state),
                Arc::clone(&self.executor),
                self.config.dequeue_timeout,
            ));
        }
        debug!(phase, workers = count, batches, "spawned workers");
        set
    }

    /// Persist the table, merge results, then flip to `Completed`, in that
    /// order, so nobody observes `Completed` before the merged state exists.
    fn finish(self) {
        let tasks = self.state.tasks_snapshot();

        if let Some(sink) = self.sink.as_ref() {
            if let Err(err) = sink.store.save_tasks(&sink.session_id, &tasks) {
                error!(session = %sink.session_id, error = %err, "failed to persist task table");
                self.status.send_replace(PoolStatus::Failed);
                return;
            }
        }

        let merged = merge_results(&self.base, &tasks);
        *self.final_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(merged);

        let counts = tasks.counts();
        info!(
            completed = counts.completed,
            failed = counts.failed,
            "worker pool run complete"
        );
        // A concurrent stop wins over completion.
        self.status.send_if_modified(|status| {
            if status.is_active() {
                *status = PoolStatus::Completed;
                true
            } else {
                false
            }
        });
    }
}

async fn drain_join_set(set: &mut JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                error!(error = %err, "worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    phase: &'static str,
    queue: Arc<BatchQueue>,
    state: Arc<ExecutionState>,
    executor: Arc<dyn BatchExecutor>,
    dequeue_timeout: std::time::Duration,
) {
    debug!(worker_id, phase, "worker started");
    loop {
        if !state.wait_until_runnable().await {
            break;
        }

        let batch = match queue.dequeue(dequeue_timeout).await {
            Dequeue::Batch(batch) => batch,
            Dequeue::TimedOut => continue,
            Dequeue::Empty => break,
        };

        debug!(worker_id, phase, batch = %batch.batch_id, tasks = batch.len(), "executing batch");
        let stats = executor.execute_batch(&batch, &state).await;
        state.record_batch(&stats);
        debug!(
            worker_id,
            batch = %batch.batch_id,
            completed = stats.completed,
            failed = stats.failed,
            "batch finished"
        );
    }
    debug!(worker_id, phase, "worker exiting");
}
