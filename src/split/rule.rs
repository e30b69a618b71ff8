// src/split/rule.rs

use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::Result;

use crate::data::Cell;
use crate::data::cell::is_present;
use crate::task::Task;

/// Everything a rule may look at when classifying one cell.
#[derive(Debug, Clone, Copy)]
pub struct SplitContext<'a> {
    pub sheet: &'a str,
    pub row: usize,
    pub col: usize,
    pub column_name: &'a str,
    pub color: Option<&'a str>,
    /// `(column name, value)` for the whole row, in column order.
    pub row_values: &'a [(String, Option<String>)],
    /// Metadata carried by the stage running this split.
    pub metadata: &'a BTreeMap<String, String>,
    /// Id the splitter will accept for a task created from this cell.
    pub task_id: &'a str,
}

impl<'a> SplitContext<'a> {
    /// Value of another column in the same row, if it is non-empty.
    pub fn row_value(&self, column: &str) -> Option<&'a str> {
        self.row_values
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, v)| v.as_deref())
            .filter(|v| is_present(Some(*v)))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.row_values.iter().any(|(name, _)| name == column)
    }
}

/// A pluggable cell classifier.
///
/// The splitter evaluates rules in descending [`priority`](SplitRule::priority)
/// order; the first rule whose [`matches`](SplitRule::matches) returns `true`
/// owns the cell and no other rule sees it in that pass.
pub trait SplitRule: Send + Sync + Debug {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// 1..=10, higher wins.
    fn priority(&self) -> u8;

    fn operation_type(&self) -> &str;

    fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<bool>;

    /// Build the task for a matched cell. Implementations should use
    /// `ctx.task_id` as the task id.
    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<Task>;
}
