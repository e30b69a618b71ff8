// src/checkpoint/task_store.rs

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use crate::errors::Result;
use crate::task::TaskTable;

/// Durable home of task tables, keyed by session.
pub trait TaskStore: Send + Sync + Debug {
    fn save_tasks(&self, session_id: &str, tasks: &TaskTable) -> Result<()>;

    fn load_tasks(&self, session_id: &str) -> Result<Option<TaskTable>>;

    /// Whether the stored table still has pending or processing rows.
    fn has_incomplete(&self, session_id: &str) -> Result<bool> {
        Ok(self
            .load_tasks(session_id)?
            .is_some_and(|tasks| tasks.has_incomplete()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tables: RwLock<HashMap<String, TaskTable>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn save_tasks(&self, session_id: &str, tasks: &TaskTable) -> Result<()> {
        let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(session_id.to_string(), tasks.clone());
        Ok(())
    }

    fn load_tasks(&self, session_id: &str) -> Result<Option<TaskTable>> {
        let guard = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(session_id).cloned())
    }
}
