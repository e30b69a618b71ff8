// src/pool/transformer.rs

use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pipeline::StageExecutor;
use crate::pool::state::PoolStatus;
use crate::pool::worker_pool::WorkerPool;
use crate::process::{BoxFuture, ProcessContext, Processor};
use crate::task::TaskTable;

/// Stage executor that runs tasks through a [`WorkerPool`].
///
/// The pool is shared so callers can pause, resume or stop the stage that
/// is currently running. A stopped run fails the stage; the task table is
/// still written back so interrupted work can be checkpointed.
#[derive(Debug, Clone)]
pub struct PoolTransformer {
    pool: Arc<WorkerPool>,
    processor: Arc<dyn Processor>,
}

impl PoolTransformer {
    pub fn new(pool: Arc<WorkerPool>, processor: Arc<dyn Processor>) -> Self {
        Self { pool, processor }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl StageExecutor for PoolTransformer {
    fn execute<'a>(
        &'a self,
        state: &'a DataState,
        tasks: &'a mut TaskTable,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<DataState>> {
        Box::pin(async move {
            self.pool.start_execution(
                state.copy(),
                tasks.clone(),
                Arc::clone(&self.processor),
                ctx.clone(),
            )?;

            let outcome = self.pool.wait().await?;
            *tasks = outcome.tasks;

            match (outcome.status, outcome.state) {
                (PoolStatus::Completed, Some(merged)) => {
                    info!(
                        stage = %ctx.stage_id,
                        completed_batches = outcome.stats.completed_batches,
                        failed_batches = outcome.stats.failed_batches,
                        "pool stage finished"
                    );
                    Ok(merged)
                }
                (status, _) => Err(SheetflowError::Other(anyhow!(
                    "worker pool ended with status '{status}'"
                ))),
            }
        })
    }
}
