// src/pipeline/mod.rs

//! Multi-stage pipelines.
//!
//! - [`stage`] defines `PipelineStage` and the `StageExecutor` seam.
//! - [`orchestrator`] validates the stage graph and runs stages in order.

pub mod orchestrator;
pub mod stage;

pub use orchestrator::{InFlightStage, Orchestrator, ResumePoint, StageListener, StageResult};
pub use stage::{PipelineStage, StageExecutor};
