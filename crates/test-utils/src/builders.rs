#![allow(dead_code)]

use sheetflow::data::DataState;
use sheetflow::task::{Task, TaskStatus};

/// Builder for `DataState` to simplify test setup.
///
/// Rows and markers apply to the most recently added sheet.
pub struct DataStateBuilder {
    state: DataState,
    current: Option<String>,
}

impl DataStateBuilder {
    pub fn new() -> Self {
        Self {
            state: DataState::new(),
            current: None,
        }
    }

    pub fn sheet(mut self, name: &str, columns: &[&str]) -> Self {
        self.state
            .add_sheet(name, columns.iter().copied())
            .expect("Failed to add sheet");
        self.current = Some(name.to_string());
        self
    }

    pub fn row(mut self, values: &[Option<&str>]) -> Self {
        let sheet = self.current_sheet();
        self.state
            .push_row(&sheet, values.iter().map(|v| v.map(str::to_string)).collect())
            .expect("Failed to push row");
        self
    }

    pub fn color(mut self, row: usize, col: usize, color: &str) -> Self {
        let sheet = self.current_sheet();
        self.state
            .set_color(&sheet, row, col, Some(color.to_string()))
            .expect("Failed to set color");
        self
    }

    pub fn comment(mut self, row: usize, col: usize, comment: &str) -> Self {
        let sheet = self.current_sheet();
        self.state
            .set_comment(&sheet, row, col, Some(comment.to_string()))
            .expect("Failed to set comment");
        self
    }

    pub fn build(self) -> DataState {
        self.state
    }

    fn current_sheet(&self) -> String {
        self.current
            .clone()
            .expect("call .sheet(..) before adding rows or markers")
    }
}

impl Default for DataStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    /// A pending `normal` task at `Sheet1!(0, 0)` targeting `EN`.
    pub fn new(task_id: &str) -> Self {
        Self {
            task: Task::new(task_id, "normal", 5, "Sheet1", 0, 0, "EN")
                .with_source(format!("text of {task_id}"), "CH"),
        }
    }

    pub fn operation(mut self, op: &str) -> Self {
        self.task.operation = op.to_string();
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn at(mut self, sheet: &str, row: usize, col: usize) -> Self {
        self.task.sheet = sheet.to_string();
        self.task.row = row;
        self.task.col = col;
        self
    }

    pub fn target(mut self, lang: &str) -> Self {
        self.task.target_lang = lang.to_string();
        self.task.column_name = lang.to_string();
        self
    }

    pub fn source(mut self, text: &str, lang: &str) -> Self {
        self.task.source_text = text.to_string();
        self.task.source_lang = lang.to_string();
        self
    }

    pub fn batch(mut self, batch_id: &str) -> Self {
        self.task.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn depends_on(mut self, task_id: &str) -> Self {
        self.task.depends_on = Some(task_id.to_string());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn result(mut self, result: &str) -> Self {
        self.task.result = Some(result.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
