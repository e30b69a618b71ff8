// src/process/transformer.rs

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::data::DataState;
use crate::errors::Result;
use crate::process::context::ProcessContext;
use crate::process::processor::Processor;
use crate::task::{TaskStatus, TaskTable};

/// Runs a task table against a copy of a [`DataState`], one task at a time.
///
/// The input state is never touched: results are written into a fresh copy,
/// which is returned. A failing task is recorded on the task and the loop
/// moves on. Tasks that are already settled are not processed again.
#[derive(Debug, Clone)]
pub struct Transformer {
    processor: Arc<dyn Processor>,
}

impl Transformer {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub async fn execute(
        &self,
        state: &DataState,
        tasks: &mut TaskTable,
        ctx: &ProcessContext,
    ) -> Result<DataState> {
        tasks.validate()?;

        let mut new_state = state.copy();
        let mut local = ctx.with_visible_tasks(tasks.iter());
        let mut completed = 0usize;
        let mut failed = 0usize;

        info!(
            stage = %ctx.stage_id,
            processor = self.processor.name(),
            tasks = tasks.len(),
            "transformer starting"
        );

        for task in tasks.iter_mut() {
            // Already settled successfully (e.g. restored from a checkpoint):
            // re-apply the result instead of processing again.
            if task.status == TaskStatus::Completed {
                if let Some(result) = task.result.as_deref() {
                    if let Err(err) = new_state.set_cell_value(&task.sheet, task.row, task.col, result) {
                        warn!(task = %task.task_id, error = %err, "could not re-apply restored result");
                    }
                }
                continue;
            }
            if task.status == TaskStatus::Failed {
                debug!(task = %task.task_id, "task already failed; skipping");
                continue;
            }

            let started = Instant::now();

            if let Err(err) = task.validate() {
                warn!(task = %task.task_id, error = %err, "invalid task; marking failed");
                task.fail(err.to_string(), started.elapsed());
                local.notify_task(task);
                failed += 1;
                continue;
            }

            task.mark_processing();
            let outcome = self.processor.process(task, &local).await;

            match outcome {
                Ok(output) => {
                    if let Err(err) =
                        new_state.set_cell_value(&task.sheet, task.row, task.col, output.text.as_str())
                    {
                        warn!(task = %task.task_id, error = %err, "could not write result");
                        task.fail(err.to_string(), started.elapsed());
                        local.notify_task(task);
                        failed += 1;
                        continue;
                    }
                    task.complete(output.text, output.confidence, started.elapsed());
                    local.notify_task(task);
                    Arc::make_mut(&mut local.previous_tasks)
                        .insert(task.task_id.clone(), task.clone());
                    debug!(task = %task.task_id, "task completed");
                    completed += 1;
                }
                Err(err) => {
                    warn!(task = %task.task_id, error = %err, "task failed");
                    task.fail(format!("{err:#}"), started.elapsed());
                    local.notify_task(task);
                    failed += 1;
                }
            }
        }

        info!(stage = %ctx.stage_id, completed, failed, "transformer finished");
        Ok(new_state)
    }
}

/// Write every completed result of `tasks` into a fresh copy of `base`.
///
/// Results that no longer fit the sheet are logged and skipped.
pub fn merge_results(base: &DataState, tasks: &TaskTable) -> DataState {
    let mut merged = base.copy();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Completed) {
        let Some(result) = task.result.as_deref() else {
            continue;
        };
        if let Err(err) = merged.set_cell_value(&task.sheet, task.row, task.col, result) {
            warn!(task = %task.task_id, error = %err, "skipping result outside the sheet");
        }
    }
    merged
}
