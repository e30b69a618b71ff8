// src/split/splitter.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::data::DataState;
use crate::data::cell::is_present;
use crate::split::batch::{BatchAllocator, BatchAssignment};
use crate::split::rule::{SplitContext, SplitRule};
use crate::task::{TaskIdGenerator, TaskStatus, TaskTable};

/// Result of one split pass.
#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    pub tasks: TaskTable,
    pub batches: Vec<BatchAssignment>,
    /// Cells where a rule errored or produced a malformed task.
    pub rejected: usize,
    /// Derived tasks dropped because they had no input and nothing in the
    /// pass produces one.
    pub skipped: usize,
}

/// Applies split rules to every cell of a [`DataState`].
///
/// Guarantees:
/// - at most one task per `(sheet, row, col)` per pass
/// - the same rules over the same state always yield the same table
///   (ids, order and batch assignment)
/// - a failing rule or malformed task only skips that cell
#[derive(Debug, Clone)]
pub struct TaskSplitter {
    allocator: BatchAllocator,
    id_prefix: String,
}

impl TaskSplitter {
    pub fn new(batch_char_budget: usize) -> Self {
        Self {
            allocator: BatchAllocator::new(batch_char_budget),
            id_prefix: "T".to_string(),
        }
    }

    /// Prefix for generated task ids (default `T`).
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn split(&self, state: &DataState, rules: &[Arc<dyn SplitRule>]) -> TaskTable {
        self.split_with_metadata(state, rules, &BTreeMap::new()).tasks
    }

    pub fn split_with_metadata(
        &self,
        state: &DataState,
        rules: &[Arc<dyn SplitRule>],
        metadata: &BTreeMap<String, String>,
    ) -> SplitOutcome {
        // Stable sort: equal priorities keep their registration order.
        let mut ordered: Vec<&Arc<dyn SplitRule>> = rules.iter().collect();
        ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let mut ids = TaskIdGenerator::with_prefix(self.id_prefix.as_str());
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut table = TaskTable::new();
        let mut rejected = 0usize;

        let sheet_names: Vec<String> = state.sheet_names().map(str::to_string).collect();
        for sheet in &sheet_names {
            let Some(sheet_ref) = state.sheet(sheet) else {
                continue;
            };
            let columns = sheet_ref.columns.clone();

            for row in 0..sheet_ref.row_count() {
                let row_values = match state.row_values(sheet, row) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(sheet = %sheet, row, error = %err, "skipping unreadable row");
                        continue;
                    }
                };

                for (col, column_name) in columns.iter().enumerate() {
                    let cell = match state.get_cell(sheet, row, col) {
                        Ok(c) => c,
                        Err(err) => {
                            warn!(sheet = %sheet, row, col, error = %err, "skipping unreadable cell");
                            continue;
                        }
                    };

                    let task_id = ids.peek();
                    let ctx = SplitContext {
                        sheet,
                        row,
                        col,
                        column_name,
                        color: cell.color.as_deref(),
                        row_values: &row_values,
                        metadata,
                        task_id: &task_id,
                    };

                    let Some(rule) = ordered.iter().find(|rule| {
                        match rule.matches(&cell, &ctx) {
                            Ok(matched) => matched,
                            Err(err) => {
                                warn!(
                                    rule = rule.name(),
                                    sheet = %sheet,
                                    row,
                                    col,
                                    error = %err,
                                    "rule failed while matching; trying next rule"
                                );
                                false
                            }
                        }
                    }) else {
                        continue;
                    };

                    let task = match rule.create_task(&cell, &ctx) {
                        Ok(task) => task,
                        Err(err) => {
                            warn!(
                                rule = rule.name(),
                                sheet = %sheet,
                                row,
                                col,
                                error = %err,
                                "rule failed to create task; skipping cell"
                            );
                            rejected += 1;
                            continue;
                        }
                    };

                    if let Err(err) = task.validate() {
                        warn!(rule = rule.name(), error = %err, "rejecting malformed task");
                        rejected += 1;
                        continue;
                    }
                    if task.status != TaskStatus::Pending {
                        warn!(
                            rule = rule.name(),
                            task = %task.task_id,
                            status = %task.status,
                            "rejecting task that does not start pending"
                        );
                        rejected += 1;
                        continue;
                    }
                    if !seen_ids.insert(task.task_id.clone()) {
                        warn!(rule = rule.name(), task = %task.task_id, "rejecting duplicate task id");
                        rejected += 1;
                        continue;
                    }

                    debug!(
                        task = %task.task_id,
                        rule = rule.name(),
                        operation = %task.operation,
                        sheet = %sheet,
                        row,
                        col,
                        "cell matched"
                    );
                    ids.next_id();
                    table.push(task);
                }
            }
        }

        let skipped = link_dependencies(&mut table);
        table.sort_by_priority();
        let batches = self.allocator.allocate(&mut table);

        info!(
            tasks = table.len(),
            batches = batches.len(),
            rejected,
            skipped,
            "split complete"
        );

        SplitOutcome {
            tasks: table,
            batches,
            rejected,
            skipped,
        }
    }
}

impl Default for TaskSplitter {
    fn default() -> Self {
        Self::new(BatchAllocator::DEFAULT_CHAR_BUDGET)
    }
}

/// Resolve `derive_from` column references into `depends_on` task ids.
///
/// A derived task with an empty source and no producer could never succeed,
/// so it is dropped. Returns how many were dropped.
fn link_dependencies(table: &mut TaskTable) -> usize {
    let owners: HashMap<(String, usize, String), String> = table
        .iter()
        .map(|t| {
            (
                (t.sheet.clone(), t.row, t.column_name.clone()),
                t.task_id.clone(),
            )
        })
        .collect();

    for task in table.iter_mut() {
        let Some(from) = task.derive_from.as_ref() else {
            continue;
        };
        let key = (task.sheet.clone(), task.row, from.clone());
        match owners.get(&key) {
            Some(owner) if *owner != task.task_id => {
                debug!(task = %task.task_id, depends_on = %owner, "linked derived task");
                task.depends_on = Some(owner.clone());
            }
            _ => {}
        }
    }

    let before = table.len();
    table.retain(|t| {
        let orphan = t.derive_from.is_some()
            && t.depends_on.is_none()
            && !is_present(Some(t.source_text.as_str()));
        if orphan {
            debug!(task = %t.task_id, "dropping derived task with nothing to derive from");
        }
        !orphan
    });
    before - table.len()
}
