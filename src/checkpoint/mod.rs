// src/checkpoint/mod.rs

//! Sessions, checkpoints and resumption.
//!
//! - [`model`] is the versioned checkpoint schema.
//! - [`store`] persists checkpoint artifacts.
//! - [`session`] is the injected session registry.
//! - [`task_store`] keeps task tables durable per session.
//! - [`resume`] ties them together: create/restore/expire checkpoints.

pub mod model;
pub mod resume;
pub mod session;
pub mod store;
pub mod task_store;

pub use model::{Checkpoint, CheckpointPayload, CheckpointSummary, CHECKPOINT_SCHEMA_VERSION};
pub use resume::{CheckpointConfig, ResumeHandler};
pub use session::{InMemorySessionStore, Session, SessionStatus, SessionStore};
pub use store::{CheckpointEntry, CheckpointStore, FsCheckpointStore};
pub use task_store::{InMemoryTaskStore, TaskStore};
