// src/engine/session_runner.rs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::checkpoint::{ResumeHandler, Session, SessionStatus};
use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pipeline::{InFlightStage, Orchestrator, ResumePoint, StageListener, StageResult};
use crate::task::{Task, TaskTable};

/// Outcome of a session run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub state: DataState,
    /// Set when the session was rebuilt from a checkpoint.
    pub restored_from: Option<String>,
}

/// Runs an [`Orchestrator`] inside a tracked, checkpointed session.
///
/// The session mirrors pipeline progress task by task, so a checkpoint
/// taken at any point (after a stage, by autosave, or after a failure) can
/// be resumed with [`resume`](Self::resume) without redoing settled work.
#[derive(Debug, Clone)]
pub struct SessionRunner {
    handler: Arc<ResumeHandler>,
    checkpoint_after_stage: bool,
    autosave_interval: Option<Duration>,
}

impl SessionRunner {
    pub fn new(handler: Arc<ResumeHandler>) -> Self {
        Self {
            handler,
            checkpoint_after_stage: true,
            autosave_interval: None,
        }
    }

    pub fn checkpoint_after_stage(mut self, enabled: bool) -> Self {
        self.checkpoint_after_stage = enabled;
        self
    }

    /// Also checkpoint periodically while a run is in progress.
    pub fn with_autosave(mut self, interval: Duration) -> Self {
        self.autosave_interval = Some(interval);
        self
    }

    pub fn handler(&self) -> &Arc<ResumeHandler> {
        &self.handler
    }

    /// Run the whole pipeline in a fresh session.
    pub async fn run(&self, orchestrator: &mut Orchestrator, initial: DataState) -> Result<RunReport> {
        let session = Session::generate(initial.copy());
        let session_id = session.session_id.clone();
        self.handler.sessions().put(session);
        info!(session = %session_id, "session created");

        let state = self
            .drive(orchestrator, &session_id, initial, ResumePoint::default())
            .await?;
        Ok(RunReport {
            session_id,
            state,
            restored_from: None,
        })
    }

    /// Restore a checkpoint into a new session and continue from where it
    /// stopped.
    pub async fn resume(&self, orchestrator: &mut Orchestrator, checkpoint: &Path) -> Result<RunReport> {
        let session_id = self.handler.restore_checkpoint(checkpoint)?;
        let session = self
            .handler
            .sessions()
            .get(&session_id)
            .ok_or_else(|| SheetflowError::SessionNotFound(session_id.clone()))?;

        info!(
            session = %session_id,
            restored_from = ?session.restored_from,
            completed_stages = session.resume.completed_stages.len(),
            in_flight = ?session.resume.in_flight.as_ref().map(|s| s.stage_id.as_str()),
            "resuming session"
        );

        let state = self
            .drive(orchestrator, &session_id, session.data_state, session.resume)
            .await?;
        Ok(RunReport {
            session_id,
            state,
            restored_from: session.restored_from,
        })
    }

    async fn drive(
        &self,
        orchestrator: &mut Orchestrator,
        session_id: &str,
        initial: DataState,
        resume: ResumePoint,
    ) -> Result<DataState> {
        let sessions = Arc::clone(self.handler.sessions());
        sessions.update(session_id, &mut |s: &mut Session| {
            s.status = SessionStatus::Running;
            s.error = None;
        })?;

        let listener = Arc::new(SessionListener {
            handler: Arc::clone(&self.handler),
            session_id: session_id.to_string(),
            checkpoint: self.checkpoint_after_stage,
        });
        orchestrator.set_listener(Some(listener));

        let autosave = self.autosave_interval.map(|interval| {
            let (tx, rx) = watch::channel(false);
            let handle = Arc::clone(&self.handler).spawn_autosave(session_id.to_string(), interval, rx);
            (tx, handle)
        });

        let outcome = orchestrator.execute_from(initial, resume).await;
        orchestrator.set_listener(None);

        match &outcome {
            Ok(state) => {
                let final_state = state.copy();
                sessions.update(session_id, &mut |s: &mut Session| {
                    s.status = SessionStatus::Completed;
                    s.current_stage = None;
                    s.data_state = final_state.clone();
                    s.resume.in_flight = None;
                })?;
                info!(session = %session_id, "session completed");
            }
            Err(err) => {
                let message = err.to_string();
                sessions.update(session_id, &mut |s: &mut Session| {
                    s.status = SessionStatus::Failed;
                    s.error = Some(message.clone());
                })?;
                warn!(session = %session_id, error = %message, "session failed");
            }
        }

        if let Some((tx, handle)) = autosave {
            // The autosave loop takes a final checkpoint on shutdown.
            let _ = tx.send(true);
            if let Err(err) = handle.await {
                warn!(session = %session_id, error = %err, "autosave task ended abnormally");
            }
        } else if outcome.is_err() && self.checkpoint_after_stage {
            if let Err(err) = self.handler.create_checkpoint(session_id) {
                warn!(session = %session_id, error = %err, "could not checkpoint failed session");
            }
        }

        outcome
    }
}

/// Mirrors pipeline progress onto a session.
#[derive(Debug)]
struct SessionListener {
    handler: Arc<ResumeHandler>,
    session_id: String,
    checkpoint: bool,
}

impl SessionListener {
    fn record_tasks(&self, tasks: &TaskTable) {
        if let Err(err) = self.handler.task_store().save_tasks(&self.session_id, tasks) {
            warn!(session = %self.session_id, error = %err, "could not persist task table");
        }
    }
}

impl StageListener for SessionListener {
    fn on_stage_started(&self, stage_id: &str, state: &DataState, tasks: &TaskTable) {
        let update = self.handler.sessions().update(&self.session_id, &mut |s: &mut Session| {
            s.current_stage = Some(stage_id.to_string());
            s.data_state = state.copy();
            s.task_table = tasks.clone();
            s.resume.in_flight = Some(InFlightStage {
                stage_id: stage_id.to_string(),
                tasks: tasks.clone(),
            });
        });
        if let Err(err) = update {
            warn!(session = %self.session_id, stage = %stage_id, error = %err, "could not record stage start");
        }
        self.record_tasks(tasks);
    }

    fn on_task_updated(&self, stage_id: &str, task: &Task) {
        let update = self.handler.sessions().update(&self.session_id, &mut |s: &mut Session| {
            s.task_table.replace(task.clone());
            let in_flight = s.resume.in_flight.as_mut().filter(|f| f.stage_id == stage_id);
            if let Some(in_flight) = in_flight {
                in_flight.tasks.replace(task.clone());
            }
        });
        if let Err(err) = update {
            warn!(session = %self.session_id, task = %task.task_id, error = %err, "could not record task update");
        }
    }

    fn on_stage_failed(&self, stage_id: &str, tasks: &TaskTable) {
        let mut tasks = tasks.clone();
        tasks.reset_in_flight();
        let update = self.handler.sessions().update(&self.session_id, &mut |s: &mut Session| {
            s.task_table = tasks.clone();
            s.resume.in_flight = Some(InFlightStage {
                stage_id: stage_id.to_string(),
                tasks: tasks.clone(),
            });
        });
        if let Err(err) = update {
            warn!(session = %self.session_id, stage = %stage_id, error = %err, "could not record stage failure");
        }
        self.record_tasks(&tasks);
    }

    fn on_stage_completed(&self, stage_id: &str, result: &StageResult) -> Result<()> {
        self.handler.sessions().update(&self.session_id, &mut |s: &mut Session| {
            s.data_state = result.state.copy();
            s.task_table = result.tasks.clone();
            s.resume
                .completed_stages
                .insert(stage_id.to_string(), result.tasks.clone());
            s.resume.in_flight = None;
        })?;
        self.record_tasks(&result.tasks);

        if self.checkpoint {
            self.handler.create_checkpoint(&self.session_id)?;
        }
        Ok(())
    }
}
