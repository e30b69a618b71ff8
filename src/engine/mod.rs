// src/engine/mod.rs

//! Session-level driver.
//!
//! This module ties together:
//! - the stage orchestrator
//! - the session registry and durable task storage
//! - per-stage checkpoints and the optional autosave loop
//! - resumption of an interrupted session from its checkpoint

pub mod session_runner;

pub use session_runner::{RunReport, SessionRunner};
