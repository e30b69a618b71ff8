// src/lib.rs

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod split;
pub mod task;

use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::{FsCheckpointStore, InMemorySessionStore, InMemoryTaskStore, ResumeHandler};
use crate::config::EngineConfig;
use crate::engine::{RunReport, SessionRunner};
use crate::pool::{PoolTransformer, WorkerPool};

pub use crate::data::{Cell, CellKey, DataState, DataStore};
pub use crate::errors::{Result, SheetflowError};
pub use crate::pipeline::{Orchestrator, PipelineStage, ResumePoint, StageExecutor};
pub use crate::process::{Processor, ProcessContext, Transformer};
pub use crate::split::{SplitRule, TaskSplitter};
pub use crate::task::{Task, TaskStatus, TaskTable};

/// High-level entry point for embedding hosts.
///
/// This wires together:
/// - the configured stages, each executed through one shared worker pool
/// - an in-memory session registry and task store
/// - filesystem checkpoints under `[checkpoint].dir`, with autosave
/// - a retention sweep once the run has finished
///
/// Logging is left to the host; see [`logging::init_logging`].
pub async fn run_with_config(
    cfg: &EngineConfig,
    store: &dyn DataStore,
    processor: Arc<dyn Processor>,
) -> Result<RunReport> {
    let pool = Arc::new(WorkerPool::new(cfg.pool_config()));
    let executor = Arc::new(PoolTransformer::new(pool, processor));
    let mut orchestrator = cfg.build_orchestrator(executor)?;

    let checkpoint_cfg = cfg.checkpoint_config();
    let handler = Arc::new(
        ResumeHandler::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(FsCheckpointStore::new(checkpoint_cfg.dir.clone())),
            Arc::new(InMemoryTaskStore::new()),
        )
        .with_retention(checkpoint_cfg.retention),
    );
    let runner = SessionRunner::new(Arc::clone(&handler)).with_autosave(checkpoint_cfg.interval);

    let initial = store.load()?;
    info!(
        stages = cfg.stages.len(),
        sheets = initial.sheet_names().count(),
        "running configured pipeline"
    );
    let report = runner.run(&mut orchestrator, initial).await?;
    store.save(&report.state)?;

    if let Err(err) = handler.cleanup_expired() {
        warn!(error = %err, "checkpoint cleanup failed");
    }
    Ok(report)
}
