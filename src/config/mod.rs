// src/config/mod.rs

//! Configuration loading and validation for sheetflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like stage-graph correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_config};
pub use model::{
    CheckpointSection, EngineConfig, LoggingSection, PoolSection, RuleConfig, StageConfig,
};
pub use validate::validate_config;
