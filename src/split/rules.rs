// src/split/rules.rs

//! Built-in split rules.
//!
//! Columns are named by language code (`CH`, `EN`, `TH`, ...). A task's
//! `target_lang` is the header of the column it writes to.

use anyhow::{anyhow, Result};
use regex::Regex;

use crate::data::Cell;
use crate::split::rule::{SplitContext, SplitRule};
use crate::task::Task;

pub const OP_NORMAL: &str = "normal";
pub const OP_RETRANSLATE: &str = "retranslate";
pub const OP_SHORTEN: &str = "shorten";
pub const OP_DERIVE: &str = "derive";

fn targets_column(targets: &[String], column: &str) -> bool {
    targets.is_empty() || targets.iter().any(|t| t == column)
}

fn base_task(cell: &Cell, ctx: &SplitContext<'_>, operation: &str, priority: u8) -> Task {
    Task::new(
        ctx.task_id,
        operation,
        priority,
        cell.sheet.as_str(),
        cell.row,
        cell.col,
        ctx.column_name,
    )
    .with_column_name(ctx.column_name)
}

/// Fills empty target cells from a non-empty source column.
#[derive(Debug, Clone)]
pub struct EmptyCellRule {
    pub source_column: String,
    pub source_lang: String,
    pub target_columns: Vec<String>,
    pub priority: u8,
}

impl EmptyCellRule {
    pub const DEFAULT_PRIORITY: u8 = 5;

    /// `target_columns` empty means "every column except the source".
    pub fn new<I, S>(source_column: impl Into<String>, target_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source_column = source_column.into();
        Self {
            source_lang: source_column.clone(),
            source_column,
            target_columns: target_columns.into_iter().map(Into::into).collect(),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    pub fn with_source_lang(mut self, lang: impl Into<String>) -> Self {
        self.source_lang = lang.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

impl SplitRule for EmptyCellRule {
    fn name(&self) -> &str {
        "empty_cell"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn operation_type(&self) -> &str {
        OP_NORMAL
    }

    fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<bool> {
        Ok(ctx.column_name != self.source_column
            && targets_column(&self.target_columns, ctx.column_name)
            && !cell.has_value()
            && ctx.row_value(&self.source_column).is_some())
    }

    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<Task> {
        let source = ctx
            .row_value(&self.source_column)
            .ok_or_else(|| anyhow!("source column '{}' is empty", self.source_column))?;
        Ok(base_task(cell, ctx, OP_NORMAL, self.priority)
            .with_source(source, self.source_lang.as_str()))
    }
}

/// Where a colour-marked task takes its input text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Re-derive from the row's source column.
    SourceColumn,
    /// Rework the text already in the marked cell.
    CellValue,
}

/// Cells carrying a colour marker get a dedicated operation.
///
/// The two common set-ups are [`ColorMarkedRule::retranslate`] (yellow:
/// translate again from the source column) and [`ColorMarkedRule::shorten`]
/// (blue: shorten the existing text).
#[derive(Debug, Clone)]
pub struct ColorMarkedRule {
    pub color: String,
    pub operation: String,
    pub source_column: String,
    pub source_lang: String,
    pub target_columns: Vec<String>,
    pub source_mode: SourceMode,
    pub priority: u8,
}

impl ColorMarkedRule {
    pub const DEFAULT_PRIORITY: u8 = 8;

    pub fn retranslate<I, S>(
        color: impl Into<String>,
        source_column: impl Into<String>,
        target_columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source_column = source_column.into();
        Self {
            color: color.into(),
            operation: OP_RETRANSLATE.to_string(),
            source_lang: source_column.clone(),
            source_column,
            target_columns: target_columns.into_iter().map(Into::into).collect(),
            source_mode: SourceMode::SourceColumn,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    pub fn shorten<I, S>(
        color: impl Into<String>,
        source_column: impl Into<String>,
        target_columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation: OP_SHORTEN.to_string(),
            source_mode: SourceMode::CellValue,
            priority: Self::DEFAULT_PRIORITY - 1,
            ..Self::retranslate(color, source_column, target_columns)
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_source_lang(mut self, lang: impl Into<String>) -> Self {
        self.source_lang = lang.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

impl SplitRule for ColorMarkedRule {
    fn name(&self) -> &str {
        "color_marked"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn operation_type(&self) -> &str {
        &self.operation
    }

    fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<bool> {
        if ctx.column_name == self.source_column
            || !targets_column(&self.target_columns, ctx.column_name)
            || !cell.color_is(&self.color)
        {
            return Ok(false);
        }
        Ok(match self.source_mode {
            SourceMode::SourceColumn => ctx.row_value(&self.source_column).is_some(),
            SourceMode::CellValue => cell.has_value(),
        })
    }

    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<Task> {
        let task = base_task(cell, ctx, &self.operation, self.priority);
        let task = match self.source_mode {
            SourceMode::SourceColumn => {
                let source = ctx
                    .row_value(&self.source_column)
                    .ok_or_else(|| anyhow!("source column '{}' is empty", self.source_column))?;
                task.with_source(source, self.source_lang.as_str())
            }
            SourceMode::CellValue => task.with_source(cell.text(), ctx.column_name),
        };
        Ok(task)
    }
}

/// Fills a target column from another target column of the same row.
///
/// When the splitter also produces a task for `from_column` in that row,
/// the derived task is linked to it through `depends_on` and reads its
/// result instead of the (possibly empty) current value. With neither a
/// producer nor a current value the splitter drops the task.
#[derive(Debug, Clone)]
pub struct DerivedRule {
    pub from_column: String,
    pub target_columns: Vec<String>,
    pub operation: String,
    pub priority: u8,
}

impl DerivedRule {
    pub const DEFAULT_PRIORITY: u8 = 3;

    pub fn new<I, S>(from_column: impl Into<String>, target_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from_column: from_column.into(),
            target_columns: target_columns.into_iter().map(Into::into).collect(),
            operation: OP_DERIVE.to_string(),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

impl SplitRule for DerivedRule {
    fn name(&self) -> &str {
        "derived"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn operation_type(&self) -> &str {
        &self.operation
    }

    fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<bool> {
        Ok(ctx.column_name != self.from_column
            && !self.target_columns.is_empty()
            && targets_column(&self.target_columns, ctx.column_name)
            && !cell.has_value()
            && ctx.has_column(&self.from_column))
    }

    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<Task> {
        let current = ctx.row_value(&self.from_column).unwrap_or("");
        Ok(base_task(cell, ctx, &self.operation, self.priority)
            .with_source(current, self.from_column.as_str())
            .with_derive_from(self.from_column.as_str()))
    }
}

/// Matches cell values against a regular expression.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub pattern: Regex,
    pub columns: Vec<String>,
    pub operation: String,
    pub priority: u8,
}

impl PatternRule {
    pub fn new(pattern: &str, operation: impl Into<String>, priority: u8) -> Result<Self> {
        let pattern =
            Regex::new(pattern).map_err(|e| anyhow!("invalid pattern '{pattern}': {e}"))?;
        Ok(Self {
            pattern,
            columns: Vec::new(),
            operation: operation.into(),
            priority,
        })
    }

    pub fn in_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

impl SplitRule for PatternRule {
    fn name(&self) -> &str {
        "pattern"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn operation_type(&self) -> &str {
        &self.operation
    }

    fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<bool> {
        Ok(targets_column(&self.columns, ctx.column_name)
            && cell.has_value()
            && self.pattern.is_match(cell.text()))
    }

    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> Result<Task> {
        Ok(base_task(cell, ctx, &self.operation, self.priority)
            .with_source(cell.text(), ctx.column_name))
    }
}
