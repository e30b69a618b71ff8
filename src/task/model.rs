// src/task/model.rs

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SheetflowError};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Lifecycle of a task.
///
/// Every task starts `Pending`. Once execution settles, exactly one of
/// `Completed` (with `result`) or `Failed` (with `error_message`) holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unit of work derived from a single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    /// Semantic type assigned by the rule (`normal`, `retranslate`, ...).
    pub operation: String,
    pub priority: u8,

    pub sheet: String,
    pub row: usize,
    pub col: usize,
    /// Header name of the target column.
    pub column_name: String,

    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,

    /// Task whose result feeds this one.
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Column in the same row whose task (if any) this one depends on.
    /// Resolved into `depends_on` by the splitter.
    #[serde(default)]
    pub derive_from: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Task {
    /// A fresh `Pending` task at a location. Source fields start empty.
    pub fn new(
        task_id: impl Into<String>,
        operation: impl Into<String>,
        priority: u8,
        sheet: impl Into<String>,
        row: usize,
        col: usize,
        target_lang: impl Into<String>,
    ) -> Self {
        let target_lang = target_lang.into();
        Self {
            task_id: task_id.into(),
            operation: operation.into(),
            priority,
            sheet: sheet.into(),
            row,
            col,
            column_name: target_lang.clone(),
            source_text: String::new(),
            source_lang: String::new(),
            target_lang,
            depends_on: None,
            derive_from: None,
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            retry_count: 0,
            batch_id: None,
            confidence: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn with_source(mut self, text: impl Into<String>, lang: impl Into<String>) -> Self {
        self.source_text = text.into();
        self.source_lang = lang.into();
        self
    }

    pub fn with_column_name(mut self, column: impl Into<String>) -> Self {
        self.column_name = column.into();
        self
    }

    pub fn with_derive_from(mut self, column: impl Into<String>) -> Self {
        self.derive_from = Some(column.into());
        self
    }

    /// Size used by batch allocation.
    pub fn char_count(&self) -> usize {
        self.source_text.chars().count()
    }

    /// Check the fields every task must carry before it can be scheduled.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            SheetflowError::InvalidTask(format!(
                "task '{}' is missing required field `{field}`",
                self.task_id
            ))
        };

        if self.task_id.trim().is_empty() {
            return Err(missing("task_id"));
        }
        if self.operation.trim().is_empty() {
            return Err(missing("operation"));
        }
        if self.sheet.trim().is_empty() {
            return Err(missing("sheet"));
        }
        if self.target_lang.trim().is_empty() {
            return Err(missing("target_lang"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(SheetflowError::InvalidTask(format!(
                "task '{}' has priority {} outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                self.task_id, self.priority
            )));
        }
        Ok(())
    }

    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: String, confidence: Option<f64>, elapsed: Duration) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error_message = None;
        self.confidence = confidence;
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(elapsed.as_millis() as u64);
    }

    pub fn fail(&mut self, message: impl Into<String>, elapsed: Duration) {
        self.status = TaskStatus::Failed;
        self.result = None;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(elapsed.as_millis() as u64);
    }

    /// Put a failed task back in the queue. The id and retry count survive.
    pub fn reset_for_retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }
}

/// Hands out deterministic, scan-ordered task ids (`T000001`, `T000002`, ...).
#[derive(Debug, Clone)]
pub struct TaskIdGenerator {
    prefix: String,
    next: u64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::with_prefix("T")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}{:06}", self.prefix, self.next);
        self.next += 1;
        id
    }

    /// Peek at the id the next call to `next_id` will return.
    pub fn peek(&self) -> String {
        format!("{}{:06}", self.prefix, self.next)
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
