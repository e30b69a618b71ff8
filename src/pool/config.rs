// src/pool/config.rs

use std::collections::BTreeSet;
use std::time::Duration;

use crate::split::OP_DERIVE;

/// Runtime options for a [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on concurrent logical workers per phase.
    pub max_workers: usize,
    /// Retries per failed task before it is terminally failed.
    pub max_retries: u32,
    /// Fixed pause before each retry round.
    pub retry_cooldown: Duration,
    /// How long a worker waits on the queue before re-checking pool status.
    pub dequeue_timeout: Duration,
    /// Operations that need another task's committed output. Their tasks go
    /// to the deferred queue and only run after the primary queue drains.
    pub deferred_operations: BTreeSet<String>,
}

impl PoolConfig {
    pub const DEFAULT_MAX_WORKERS: usize = 5;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn is_deferred(&self, operation: &str) -> bool {
        self.deferred_operations.contains(operation)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    pub fn with_deferred_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deferred_operations = operations.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_cooldown: Duration::from_secs(1),
            dequeue_timeout: Duration::from_millis(100),
            deferred_operations: BTreeSet::from([OP_DERIVE.to_string()]),
        }
    }
}
