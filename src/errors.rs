// src/errors.rs

//! Crate-wide error type and `Result` alias.
//!
//! Configuration problems (`InvalidPipeline`, `CircularDependency`) and
//! stage failures (`StageExecution`) are the only errors that abort a run.
//! Task-level failures never surface here; they are recorded on the task.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetflowError {
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    #[error("Stage '{stage}' failed: {source}")]
    StageExecution {
        stage: String,
        #[source]
        source: Box<SheetflowError>,
    },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("Sheet already exists: {0}")]
    DuplicateSheet(String),

    #[error("Cell ({row}, {col}) is out of bounds for sheet '{sheet}' ({rows}x{cols})")]
    CellOutOfBounds {
        sheet: String,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SheetflowError {
    /// Wrap an error raised while a stage was executing.
    pub fn stage(stage: impl Into<String>, source: SheetflowError) -> Self {
        SheetflowError::StageExecution {
            stage: stage.into(),
            source: Box::new(source),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SheetflowError>;
