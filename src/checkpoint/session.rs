// src/checkpoint/session.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pipeline::ResumePoint;
use crate::task::TaskTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        self == SessionStatus::Completed
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One pipeline run over one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage: Option<String>,
    pub data_state: DataState,
    /// Task table of the current stage.
    pub task_table: TaskTable,
    pub resume: ResumePoint,
    pub metadata: BTreeMap<String, String>,
    pub error: Option<String>,
    /// Newest checkpoint written for this session.
    pub latest_checkpoint: Option<PathBuf>,
    /// Provenance, set when the session was rebuilt from a checkpoint.
    pub restored_from: Option<String>,
    pub restored_at: Option<DateTime<Utc>>,
    pub checkpoint_path: Option<PathBuf>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, data_state: DataState) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Created,
            created_at: now,
            updated_at: now,
            current_stage: None,
            data_state,
            task_table: TaskTable::new(),
            resume: ResumePoint::default(),
            metadata: BTreeMap::new(),
            error: None,
            latest_checkpoint: None,
            restored_from: None,
            restored_at: None,
            checkpoint_path: None,
        }
    }

    /// Fresh session with a random id.
    pub fn generate(data_state: DataState) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), data_state)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_restored(&self) -> bool {
        self.restored_from.is_some()
    }
}

/// Registry of sessions, injected wherever lookup is needed.
pub trait SessionStore: Send + Sync + Debug {
    /// Insert or replace a session.
    fn put(&self, session: Session);

    fn get(&self, session_id: &str) -> Option<Session>;

    /// Apply `f` to a stored session and bump its `updated_at`.
    fn update(&self, session_id: &str, f: &mut dyn FnMut(&mut Session)) -> Result<()>;

    fn remove(&self, session_id: &str) -> Option<Session>;

    fn ids(&self) -> Vec<String>;

    /// Drop sessions not updated within `age`. Returns the evicted ids.
    fn evict_older_than(&self, age: Duration) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn put(&self, session: Session) {
        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(session.session_id.clone(), session);
    }

    fn get(&self, session_id: &str) -> Option<Session> {
        let guard = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        guard.get(session_id).cloned()
    }

    fn update(&self, session_id: &str, f: &mut dyn FnMut(&mut Session)) -> Result<()> {
        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| SheetflowError::SessionNotFound(session_id.to_string()))?;
        f(session);
        session.touch();
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Option<Session> {
        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(session_id)
    }

    fn ids(&self) -> Vec<String> {
        let guard = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn evict_older_than(&self, age: Duration) -> Vec<String> {
        let cutoff = match chrono::Duration::from_std(age) {
            Ok(age) => Utc::now() - age,
            Err(_) => return Vec::new(),
        };
        let mut guard = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = guard
            .values()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &expired {
            guard.remove(id);
            debug!(session = %id, "evicted idle session");
        }
        expired
    }
}
