// src/pipeline/orchestrator.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pipeline::stage::PipelineStage;
use crate::process::{ProcessContext, TaskObserver};
use crate::split::{BatchAllocator, TaskSplitter};
use crate::task::{Task, TaskTable};

/// What one stage left behind.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub state: DataState,
    pub tasks: TaskTable,
    pub context: ProcessContext,
}

/// A stage that was interrupted mid-run, with the task table it had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightStage {
    pub stage_id: String,
    pub tasks: TaskTable,
}

/// Where to pick a pipeline back up.
///
/// Completed stages are skipped; their task tables still serve as dependency
/// context. The in-flight stage re-runs with its restored table, so tasks it
/// had already completed are not processed again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub completed_stages: BTreeMap<String, TaskTable>,
    pub in_flight: Option<InFlightStage>,
}

impl ResumePoint {
    pub fn is_empty(&self) -> bool {
        self.completed_stages.is_empty() && self.in_flight.is_none()
    }
}

/// Hooks around each stage. All default to no-ops.
pub trait StageListener: Send + Sync + Debug {
    /// Called after splitting, before the executor runs.
    fn on_stage_started(&self, _stage_id: &str, _state: &DataState, _tasks: &TaskTable) {}

    /// Called from inside the executor each time one of the stage's tasks
    /// settles or is reset for a retry.
    fn on_task_updated(&self, _stage_id: &str, _task: &Task) {}

    /// Called with whatever the executor left in the task table when the
    /// stage failed.
    fn on_stage_failed(&self, _stage_id: &str, _tasks: &TaskTable) {}

    /// Called once the stage's result is stored. An error aborts the run.
    fn on_stage_completed(&self, _stage_id: &str, _result: &StageResult) -> Result<()> {
        Ok(())
    }
}

/// Routes an executor's task updates to the listener, tagged with the stage.
#[derive(Debug)]
struct StageTaskRelay {
    stage_id: String,
    listener: Arc<dyn StageListener>,
}

impl TaskObserver for StageTaskRelay {
    fn on_task_updated(&self, task: &Task) {
        self.listener.on_task_updated(&self.stage_id, task);
    }
}

/// Sequences stages over a dataset.
///
/// Stages run strictly in registration order. Each stage may read (never
/// write) the task tables of the stages it lists in `depends_on`.
#[derive(Debug)]
pub struct Orchestrator {
    stages: Vec<PipelineStage>,
    batch_char_budget: usize,
    listener: Option<Arc<dyn StageListener>>,
    results: BTreeMap<String, StageResult>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            batch_char_budget: BatchAllocator::DEFAULT_CHAR_BUDGET,
            listener: None,
            results: BTreeMap::new(),
        }
    }

    pub fn with_batch_char_budget(mut self, budget: usize) -> Self {
        self.batch_char_budget = budget;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn StageListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn StageListener>>) {
        self.listener = listener;
    }

    pub fn add_stage(&mut self, stage: PipelineStage) -> &mut Self {
        debug!(stage = %stage.id, depends_on = ?stage.depends_on, "registered stage");
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> impl Iterator<Item = &PipelineStage> {
        self.stages.iter()
    }

    pub fn stage_ids(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.id.clone()).collect()
    }

    /// Result of a stage from the last run, if it ran.
    pub fn results(&self, stage_id: &str) -> Option<&StageResult> {
        self.results.get(stage_id)
    }

    /// Check the pipeline's shape without running anything.
    ///
    /// - duplicate stage ids and unknown dependencies → `InvalidPipeline`
    /// - any cycle (including self-dependency) → `CircularDependency`
    /// - a dependency registered after its dependent → `InvalidPipeline`
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(SheetflowError::InvalidPipeline(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(SheetflowError::InvalidPipeline(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.id, dep
                    )));
                }
            }
        }

        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for stage in &self.stages {
            graph.add_node(stage.id.as_str());
        }
        for stage in &self.stages {
            for dep in &stage.depends_on {
                graph.add_edge(dep.as_str(), stage.id.as_str(), ());
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(SheetflowError::CircularDependency(format!(
                "cycle in stage graph involving '{}'",
                cycle.node_id()
            )));
        }

        let position: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        for (idx, stage) in self.stages.iter().enumerate() {
            for dep in &stage.depends_on {
                if position.get(dep.as_str()).is_some_and(|&p| p > idx) {
                    return Err(SheetflowError::InvalidPipeline(format!(
                        "stage '{}' depends on '{}', which is registered after it",
                        stage.id, dep
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate, then run every stage in order, threading the dataset through.
    pub async fn execute(&mut self, initial: DataState) -> Result<DataState> {
        self.execute_from(initial, ResumePoint::default()).await
    }

    /// Like [`execute`](Self::execute), but skips the stages recorded as
    /// completed in `resume` and restarts its in-flight stage from the saved
    /// task table.
    pub async fn execute_from(&mut self, initial: DataState, resume: ResumePoint) -> Result<DataState> {
        self.validate()?;
        self.results.clear();

        let ResumePoint {
            mut completed_stages,
            mut in_flight,
        } = resume;

        info!(
            stages = self.stages.len(),
            resumed_stages = completed_stages.len(),
            "pipeline starting"
        );

        let mut current = initial;
        for stage in &self.stages {
            let ctx = self.context_for(stage);

            if let Some(tasks) = completed_stages.remove(&stage.id) {
                info!(stage = %stage.id, tasks = tasks.len(), "stage already completed; skipping");
                self.results.insert(
                    stage.id.clone(),
                    StageResult {
                        state: current.copy(),
                        tasks,
                        context: ctx,
                    },
                );
                continue;
            }

            let mut tasks = match in_flight.take() {
                Some(saved) if saved.stage_id == stage.id => {
                    let mut tasks = saved.tasks;
                    let reset = tasks.reset_in_flight();
                    info!(
                        stage = %stage.id,
                        tasks = tasks.len(),
                        reset,
                        "resuming in-flight stage"
                    );
                    tasks
                }
                other => {
                    if let Some(saved) = other.as_ref() {
                        debug!(stage = %stage.id, in_flight = %saved.stage_id, "in-flight stage is later");
                    }
                    in_flight = other;
                    let outcome = TaskSplitter::new(self.batch_char_budget)
                        .with_id_prefix(stage.task_id_prefix())
                        .split_with_metadata(&current, &stage.rules, &stage.metadata);
                    if outcome.rejected > 0 {
                        warn!(stage = %stage.id, rejected = outcome.rejected, "some cells were rejected during split");
                    }
                    if outcome.skipped > 0 {
                        debug!(stage = %stage.id, skipped = outcome.skipped, "derived tasks with no input were skipped");
                    }
                    outcome.tasks
                }
            };

            info!(stage = %stage.id, tasks = tasks.len(), "stage starting");
            if let Some(listener) = self.listener.as_ref() {
                listener.on_stage_started(&stage.id, &current, &tasks);
            }

            let new_state = match stage.executor.execute(&current, &mut tasks, &ctx).await {
                Ok(state) => state,
                Err(err) => {
                    warn!(stage = %stage.id, error = %err, "stage failed; aborting pipeline");
                    if let Some(listener) = self.listener.as_ref() {
                        listener.on_stage_failed(&stage.id, &tasks);
                    }
                    return Err(SheetflowError::stage(stage.id.as_str(), err));
                }
            };

            let counts = tasks.counts();
            info!(
                stage = %stage.id,
                completed = counts.completed,
                failed = counts.failed,
                "stage finished"
            );

            let result = StageResult {
                state: new_state.copy(),
                tasks,
                context: ctx,
            };
            if let Some(listener) = self.listener.as_ref() {
                listener.on_stage_completed(&stage.id, &result)?;
            }
            self.results.insert(stage.id.clone(), result);
            current = new_state;
        }

        info!("pipeline finished");
        Ok(current)
    }

    fn context_for(&self, stage: &PipelineStage) -> ProcessContext {
        let dependencies: BTreeMap<String, TaskTable> = stage
            .depends_on
            .iter()
            .filter_map(|dep| {
                self.results
                    .get(dep)
                    .map(|r| (dep.clone(), r.tasks.clone()))
            })
            .collect();

        let ctx = ProcessContext::new(stage.id.as_str())
            .with_dependencies(dependencies)
            .with_metadata(stage.metadata.clone());
        match self.listener.as_ref() {
            Some(listener) => ctx.with_task_observer(Arc::new(StageTaskRelay {
                stage_id: stage.id.clone(),
                listener: Arc::clone(listener),
            })),
            None => ctx,
        }
    }
}
