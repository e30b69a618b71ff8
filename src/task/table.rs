// src/task/table.rs

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::data::CellKey;
use crate::errors::{Result, SheetflowError};
use crate::task::model::{Task, TaskStatus};

/// Live counts per status, always derived from the table itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Ordered collection of tasks produced by one split pass.
///
/// Lookups by id go through an index kept next to the `Vec`. Serialized as a
/// plain list of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Task>", into = "Vec<Task>")]
pub struct TaskTable {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut table = Self {
            tasks,
            index: HashMap::new(),
        };
        table.reindex();
        table
    }

    pub fn push(&mut self, task: Task) {
        self.index
            .entry(task.task_id.clone())
            .or_insert(self.tasks.len());
        self.tasks.push(task);
    }

    /// Swap in a new version of the task with the same id. Returns `false`
    /// if no such task exists.
    pub fn replace(&mut self, task: Task) -> bool {
        match self.get_mut(&task.task_id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Keep only the tasks for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&Task) -> bool) {
        self.tasks.retain(keep);
        self.reindex();
    }

    // First occurrence wins, like a front-to-back scan.
    fn reindex(&mut self) {
        self.index.clear();
        for (pos, task) in self.tasks.iter().enumerate() {
            self.index.entry(task.task_id.clone()).or_insert(pos);
        }
    }

    fn position(&self, task_id: &str) -> Option<usize> {
        match self.index.get(task_id) {
            Some(&pos) if self.tasks.get(pos).is_some_and(|t| t.task_id == task_id) => Some(pos),
            // Ids edited through `iter_mut` leave the index stale.
            _ => self.tasks.iter().position(|t| t.task_id == task_id),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.position(task_id).and_then(|pos| self.tasks.get(pos))
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        let pos = self.position(task_id)?;
        self.tasks.get_mut(pos)
    }

    pub fn ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.task_id.clone()).collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts {
            total: self.tasks.len(),
            ..TaskCounts::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// `(priority desc, task_id asc)`.
    pub fn sort_by_priority(&mut self) {
        self.tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        self.reindex();
    }

    /// Table-level checks: unique ids and at most one task per cell.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut cells = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.task_id.as_str()) {
                return Err(SheetflowError::InvalidTask(format!(
                    "duplicate task id '{}'",
                    task.task_id
                )));
            }
            let key = CellKey::new(task.sheet.as_str(), task.row, task.col);
            if !cells.insert(key) {
                return Err(SheetflowError::InvalidTask(format!(
                    "task '{}' targets ({}, {}, {}) which another task already owns",
                    task.task_id, task.sheet, task.row, task.col
                )));
            }
        }
        Ok(())
    }

    /// Completed tasks keyed by id, for dependency lookups.
    pub fn completed_by_id(&self) -> HashMap<String, Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| (t.task_id.clone(), t.clone()))
            .collect()
    }

    /// Tasks interrupted mid-flight go back to `Pending`.
    ///
    /// Returns how many tasks were reset.
    pub fn reset_in_flight(&mut self) -> usize {
        let mut reset = 0;
        for task in self.tasks.iter_mut() {
            if task.status == TaskStatus::Processing {
                task.status = TaskStatus::Pending;
                task.started_at = None;
                reset += 1;
            }
        }
        reset
    }

    /// Distinct batch ids in first-seen order.
    pub fn batch_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tasks
            .iter()
            .filter_map(|t| t.batch_id.as_deref())
            .filter(|b| seen.insert(*b))
            .map(str::to_string)
            .collect()
    }

    pub fn has_incomplete(&self) -> bool {
        self.tasks.iter().any(|t| !t.status.is_terminal())
    }
}

impl FromIterator<Task> for TaskTable {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self::from_tasks(iter.into_iter().collect())
    }
}

impl From<Vec<Task>> for TaskTable {
    fn from(tasks: Vec<Task>) -> Self {
        Self::from_tasks(tasks)
    }
}

impl From<TaskTable> for Vec<Task> {
    fn from(table: TaskTable) -> Self {
        table.tasks
    }
}

impl IntoIterator for TaskTable {
    type Item = Task;
    type IntoIter = std::vec::IntoIter<Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}
