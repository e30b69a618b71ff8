// src/pipeline/stage.rs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::data::DataState;
use crate::errors::Result;
use crate::process::{BoxFuture, ProcessContext, Transformer};
use crate::split::SplitRule;
use crate::task::TaskTable;

/// Runs a stage's task table against the current dataset.
///
/// The input state must be left untouched; the returned state carries the
/// stage's results. Task outcomes are written back into `tasks`.
pub trait StageExecutor: Send + Sync + Debug {
    fn execute<'a>(
        &'a self,
        state: &'a DataState,
        tasks: &'a mut TaskTable,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<DataState>>;
}

impl StageExecutor for Transformer {
    fn execute<'a>(
        &'a self,
        state: &'a DataState,
        tasks: &'a mut TaskTable,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<DataState>> {
        Box::pin(Transformer::execute(self, state, tasks, ctx))
    }
}

/// A named pairing of split rules and an executor.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub id: String,
    pub rules: Vec<Arc<dyn SplitRule>>,
    pub executor: Arc<dyn StageExecutor>,
    /// Stages whose task tables this stage may read.
    pub depends_on: Vec<String>,
    /// Free-form values handed to rules and processors.
    pub metadata: BTreeMap<String, String>,
}

impl PipelineStage {
    pub fn new(id: impl Into<String>, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            id: id.into(),
            rules: Vec::new(),
            executor,
            depends_on: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn SplitRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Arc<dyn SplitRule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn depends_on<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(stages.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Prefix for this stage's task ids, unique across a pipeline.
    pub fn task_id_prefix(&self) -> String {
        format!("{}-T", self.id)
    }
}
