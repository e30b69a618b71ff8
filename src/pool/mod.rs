// src/pool/mod.rs

//! Concurrent batch execution.
//!
//! - [`config`] holds the runtime `PoolConfig`.
//! - [`batch`] defines batches and the base/retrying batch executors.
//! - [`state`] is the state shared by one run's workers, plus the queues.
//! - [`progress`] exposes live progress, counters and the observer hook.
//! - [`worker_pool`] drives workers through the primary and deferred phases.
//! - [`transformer`] plugs a pool into a pipeline stage.

pub mod batch;
pub mod config;
pub mod progress;
pub mod state;
pub mod transformer;
pub mod worker_pool;

pub use batch::{BaseBatchExecutor, Batch, BatchExecutor, BatchStats, RetryableBatchExecutor};
pub use config::PoolConfig;
pub use progress::{PoolStats, Progress, ProgressObserver, TaskEvent};
pub use state::{BatchQueue, Dequeue, ExecutionState, PoolStatus};
pub use transformer::PoolTransformer;
pub use worker_pool::{partition_batches, PoolOutcome, WorkerPool};
