// src/checkpoint/model.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::DataState;
use crate::errors::{Result, SheetflowError};
use crate::pipeline::ResumePoint;
use crate::task::{TaskCounts, TaskTable};

/// Bumped whenever the checkpoint layout changes incompatibly.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Everything needed to rebuild a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    /// Stage that was current when the checkpoint was taken.
    #[serde(default)]
    pub stage: Option<String>,
    pub data_state: DataState,
    pub task_table: TaskTable,
    #[serde(default)]
    pub resume: ResumePoint,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Versioned, self-verifying snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,
    /// Hex blake3 hash of the JSON-encoded payload.
    pub digest: String,
    pub payload: CheckpointPayload,
}

impl Checkpoint {
    pub fn new(payload: CheckpointPayload) -> Result<Self> {
        let digest = payload_digest(&payload)?;
        Ok(Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            digest,
            payload,
        })
    }

    /// Reject checkpoints from a newer schema or with a mismatching digest.
    pub fn verify(&self) -> Result<()> {
        if self.schema_version > CHECKPOINT_SCHEMA_VERSION {
            return Err(SheetflowError::Checkpoint(format!(
                "unsupported schema version {} (max {})",
                self.schema_version, CHECKPOINT_SCHEMA_VERSION
            )));
        }
        let actual = payload_digest(&self.payload)?;
        if actual != self.digest {
            return Err(SheetflowError::Checkpoint(format!(
                "digest mismatch for session '{}': expected {}, got {}",
                self.payload.session_id, self.digest, actual
            )));
        }
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.payload.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.payload.created_at
    }

    /// Human-readable summary written next to the artifact.
    pub fn summary(&self) -> CheckpointSummary {
        let counts = self.payload.task_table.counts();
        CheckpointSummary {
            session_id: self.payload.session_id.clone(),
            created_at: self.payload.created_at.to_rfc3339(),
            schema_version: self.schema_version,
            digest: self.digest.clone(),
            stage: self.payload.stage.clone(),
            completed_stages: self.payload.resume.completed_stages.keys().cloned().collect(),
            sheets: self
                .payload
                .data_state
                .sheet_names()
                .map(str::to_string)
                .collect(),
            tasks: counts.into(),
        }
    }
}

fn payload_digest(payload: &CheckpointPayload) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Contents of the `.meta.toml` companion file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub session_id: String,
    pub created_at: String,
    pub schema_version: u32,
    pub digest: String,
    pub stage: Option<String>,
    pub completed_stages: Vec<String>,
    pub sheets: Vec<String>,
    pub tasks: TaskSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl From<TaskCounts> for TaskSummary {
    fn from(c: TaskCounts) -> Self {
        Self {
            total: c.total,
            pending: c.pending,
            processing: c.processing,
            completed: c.completed,
            failed: c.failed,
        }
    }
}
