// src/split/batch.rs

use std::collections::HashMap;

use tracing::debug;

use crate::task::TaskTable;

/// Summary of one allocated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAssignment {
    pub batch_id: String,
    pub target_lang: String,
    pub task_ids: Vec<String>,
    pub chars: usize,
}

/// Greedy, char-budgeted packing of tasks into per-language batches.
///
/// Tasks are grouped by `target_lang` (groups ordered by first appearance in
/// the table) and packed in table order: a task joins the current batch while
/// `current_chars + task_chars <= budget`, otherwise the batch is closed and a
/// new one started. A task larger than the whole budget gets a batch of its
/// own.
#[derive(Debug, Clone, Copy)]
pub struct BatchAllocator {
    char_budget: usize,
}

impl BatchAllocator {
    pub const DEFAULT_CHAR_BUDGET: usize = 2000;

    pub fn new(char_budget: usize) -> Self {
        Self {
            char_budget: char_budget.max(1),
        }
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Assign `batch_id`s on every task of the table and return the batches.
    pub fn allocate(&self, table: &mut TaskTable) -> Vec<BatchAssignment> {
        let mut languages: Vec<String> = Vec::new();
        for task in table.iter() {
            if !languages.contains(&task.target_lang) {
                languages.push(task.target_lang.clone());
            }
        }

        let mut batches: Vec<BatchAssignment> = Vec::new();

        for lang in languages {
            let mut index = 0usize;
            let mut current: Option<BatchAssignment> = None;

            for task in table.iter().filter(|t| t.target_lang == lang) {
                let chars = task.char_count();
                let fits = current
                    .as_ref()
                    .is_some_and(|b| b.chars + chars <= self.char_budget);

                if !fits {
                    if let Some(done) = current.take() {
                        batches.push(done);
                    }
                    index += 1;
                    current = Some(BatchAssignment {
                        batch_id: format!("{lang}-{index:04}"),
                        target_lang: lang.clone(),
                        task_ids: Vec::new(),
                        chars: 0,
                    });
                }

                if let Some(batch) = current.as_mut() {
                    batch.chars += chars;
                    batch.task_ids.push(task.task_id.clone());
                }
            }

            if let Some(done) = current.take() {
                batches.push(done);
            }
        }

        let owners: HashMap<&str, &str> = batches
            .iter()
            .flat_map(|b| b.task_ids.iter().map(move |id| (id.as_str(), b.batch_id.as_str())))
            .collect();
        for task in table.iter_mut() {
            task.batch_id = owners.get(task.task_id.as_str()).map(|b| b.to_string());
        }

        debug!(
            batches = batches.len(),
            budget = self.char_budget,
            "allocated tasks into batches"
        );
        batches
    }
}

impl Default for BatchAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHAR_BUDGET)
    }
}
