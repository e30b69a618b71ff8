// src/process/context.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use crate::task::{Task, TaskStatus, TaskTable};

/// Told about every task of the running stage whose state changes: when it
/// settles and when it is put back for a retry.
pub trait TaskObserver: Send + Sync + Debug {
    fn on_task_updated(&self, task: &Task);
}

/// Read-only context handed to a [`Processor`](crate::process::Processor).
///
/// Cloning is cheap: every field is behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    /// Stage currently executing (empty outside a pipeline).
    pub stage_id: String,
    /// Task tables of the stages this stage declared as dependencies.
    pub dependencies: Arc<BTreeMap<String, TaskTable>>,
    /// Settled, successful tasks visible to the task being processed, keyed
    /// by task id. A task's `depends_on` is looked up here.
    pub previous_tasks: Arc<HashMap<String, Task>>,
    pub metadata: Arc<BTreeMap<String, String>>,
    pub task_observer: Option<Arc<dyn TaskObserver>>,
}

impl ProcessContext {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            ..Self::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeMap<String, TaskTable>) -> Self {
        let mut previous = (*self.previous_tasks).clone();
        for table in dependencies.values() {
            previous.extend(table.completed_by_id());
        }
        self.previous_tasks = Arc::new(previous);
        self.dependencies = Arc::new(dependencies);
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    pub fn with_task_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.task_observer = Some(observer);
        self
    }

    /// Forward a task update to the observer, if one is attached.
    pub fn notify_task(&self, task: &Task) {
        if let Some(observer) = self.task_observer.as_ref() {
            observer.on_task_updated(task);
        }
    }

    /// Same context with extra tasks made visible.
    pub fn with_visible_tasks<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut ctx = self.clone();
        let previous = Arc::make_mut(&mut ctx.previous_tasks);
        for task in tasks {
            if task.status == TaskStatus::Completed {
                previous.insert(task.task_id.clone(), task.clone());
            }
        }
        ctx
    }

    /// Result of the task this one depends on, if it has completed.
    pub fn dependency_result(&self, task: &Task) -> Option<&str> {
        let dep = task.depends_on.as_deref()?;
        self.previous_tasks.get(dep)?.result.as_deref()
    }

    pub fn stage_tasks(&self, stage_id: &str) -> Option<&TaskTable> {
        self.dependencies.get(stage_id)
    }
}
