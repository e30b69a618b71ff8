// src/checkpoint/resume.rs

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::checkpoint::model::{Checkpoint, CheckpointPayload};
use crate::checkpoint::session::{Session, SessionStatus, SessionStore};
use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::task_store::TaskStore;
use crate::errors::{Result, SheetflowError};

/// Runtime checkpoint options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// Period of the autosave loop.
    pub interval: Duration,
    /// Checkpoints older than this may be removed by cleanup.
    pub retention: Duration,
}

impl CheckpointConfig {
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".sheetflow/checkpoints"),
            interval: Duration::from_secs(60),
            retention: Self::DEFAULT_RETENTION,
        }
    }
}

/// Creates, restores and expires checkpoints for sessions.
#[derive(Debug, Clone)]
pub struct ResumeHandler {
    sessions: Arc<dyn SessionStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    tasks: Arc<dyn TaskStore>,
    retention: Duration,
}

impl ResumeHandler {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            sessions,
            checkpoints,
            tasks,
            retention: CheckpointConfig::DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    /// Snapshot a live session to a new artifact and remember its location on
    /// the session.
    pub fn create_checkpoint(&self, session_id: &str) -> Result<PathBuf> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SheetflowError::SessionNotFound(session_id.to_string()))?;

        let checkpoint = Checkpoint::new(CheckpointPayload {
            session_id: session.session_id.clone(),
            created_at: Utc::now(),
            stage: session.current_stage.clone(),
            data_state: session.data_state.clone(),
            task_table: session.task_table.clone(),
            resume: session.resume.clone(),
            metadata: session.metadata.clone(),
        })?;

        let path = self.checkpoints.write(&checkpoint).inspect_err(|err| {
            warn!(session = %session_id, error = %err, "checkpoint write failed");
        })?;

        let recorded = path.clone();
        self.sessions.update(session_id, &mut |s: &mut Session| {
            s.latest_checkpoint = Some(recorded.clone());
        })?;

        info!(
            session = %session_id,
            stage = ?session.current_stage,
            path = %path.display(),
            "checkpoint created"
        );
        Ok(path)
    }

    /// Rebuild a session from an artifact under a brand-new id.
    pub fn restore_checkpoint(&self, path: &Path) -> Result<String> {
        let checkpoint = self.checkpoints.read(path).inspect_err(|err| {
            warn!(path = %path.display(), error = %err, "checkpoint restore failed");
        })?;
        let payload = checkpoint.payload;

        let mut session = Session::generate(payload.data_state);
        session.current_stage = payload.stage;
        session.task_table = payload.task_table;
        session.resume = payload.resume;
        session.metadata = payload.metadata;
        session.restored_from = Some(payload.session_id.clone());
        session.restored_at = Some(Utc::now());
        session.checkpoint_path = Some(path.to_path_buf());

        let new_id = session.session_id.clone();
        self.tasks.save_tasks(&new_id, &session.task_table)?;
        self.sessions.put(session);

        info!(
            session = %new_id,
            restored_from = %payload.session_id,
            path = %path.display(),
            "session restored from checkpoint"
        );
        Ok(new_id)
    }

    /// A session can resume if any of these hold:
    /// - it is live in the session store and not completed
    /// - a valid checkpoint exists for it
    /// - durable task storage still holds unfinished rows for it
    pub fn can_resume(&self, session_id: &str) -> Result<bool> {
        if let Some(session) = self.sessions.get(session_id) {
            if !session.status.is_finished() {
                debug!(session = %session_id, status = %session.status, "resumable: live session");
                return Ok(true);
            }
        }

        if self.latest_checkpoint(session_id)?.is_some() {
            debug!(session = %session_id, "resumable: checkpoint on disk");
            return Ok(true);
        }

        if self.tasks.has_incomplete(session_id)? {
            debug!(session = %session_id, "resumable: incomplete tasks in storage");
            return Ok(true);
        }

        Ok(false)
    }

    /// Newest artifact for a session that loads and verifies.
    pub fn latest_checkpoint(&self, session_id: &str) -> Result<Option<PathBuf>> {
        if let Some(path) = self
            .sessions
            .get(session_id)
            .and_then(|s| s.latest_checkpoint)
        {
            if self.checkpoints.read(&path).is_ok() {
                return Ok(Some(path));
            }
            warn!(session = %session_id, path = %path.display(), "recorded checkpoint is unreadable; scanning store");
        }

        for entry in self.checkpoints.list(Some(session_id))? {
            match self.checkpoints.read(&entry.path) {
                Ok(_) => return Ok(Some(entry.path)),
                Err(err) => {
                    warn!(path = %entry.path.display(), error = %err, "skipping invalid checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Remove checkpoints older than the retention window, except the latest
    /// checkpoint of every session still in the store. Returns how many were
    /// removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| SheetflowError::Checkpoint(format!("invalid retention: {e}")))?;
        let cutoff = Utc::now() - retention;

        let mut protected: HashSet<PathBuf> = HashSet::new();
        for id in self.sessions.ids() {
            if let Some(path) = self.sessions.get(&id).and_then(|s| s.latest_checkpoint) {
                protected.insert(path);
            }
            if let Some(entry) = self.checkpoints.list(Some(&id))?.into_iter().next() {
                protected.insert(entry.path);
            }
        }

        let mut removed = 0;
        for entry in self.checkpoints.list(None)? {
            if entry.created_at >= cutoff || protected.contains(&entry.path) {
                continue;
            }
            match self.checkpoints.delete(&entry.path) {
                Ok(()) => {
                    debug!(path = %entry.path.display(), "expired checkpoint removed");
                    removed += 1;
                }
                Err(err) => warn!(path = %entry.path.display(), error = %err, "could not remove checkpoint"),
            }
        }

        info!(removed, "checkpoint cleanup finished");
        Ok(removed)
    }

    /// Checkpoint `session_id` every `interval` until `shutdown` flips to
    /// `true` (or its sender is dropped). The loop also ends once the session
    /// completes or disappears. A final checkpoint is taken on shutdown.
    pub fn spawn_autosave(
        self: Arc<Self>,
        session_id: String,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            if let Err(err) = self.create_checkpoint(&session_id) {
                                warn!(session = %session_id, error = %err, "final autosave failed");
                            }
                            break;
                        }
                        continue;
                    }
                }

                match self.sessions.get(&session_id).map(|s| s.status) {
                    None => {
                        debug!(session = %session_id, "session gone; autosave stopping");
                        break;
                    }
                    Some(SessionStatus::Completed) => {
                        debug!(session = %session_id, "session completed; autosave stopping");
                        break;
                    }
                    Some(_) => {}
                }

                if let Err(err) = self.create_checkpoint(&session_id) {
                    warn!(session = %session_id, error = %err, "autosave failed");
                }
            }
        })
    }
}
