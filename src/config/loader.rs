// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::EngineConfig;
use crate::config::validate::validate_config;
use crate::errors::{Result, SheetflowError};

/// Parse a configuration from TOML text without semantic validation.
pub fn parse_config(contents: &str) -> Result<EngineConfig> {
    Ok(toml::from_str(contents)?)
}

/// Load a configuration file from a given path and return the raw
/// `EngineConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        SheetflowError::ConfigError(format!("reading config file at {}: {e}", path.display()))
    })?;
    parse_config(&contents)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks pool sanity, stage dependencies, cycles and rule settings.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// `Sheetflow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Sheetflow.toml")
}
