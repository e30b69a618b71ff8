// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{CheckpointSection, EngineConfig, RuleConfig};
use crate::errors::{Result, SheetflowError};
use crate::task::{MAX_PRIORITY, MIN_PRIORITY};

/// Run semantic validation against a loaded configuration.
///
/// This checks:
/// - `[pool].max_workers >= 1` and `[pool].batch_char_budget >= 1`
/// - `[checkpoint].interval_secs >= 1` and `retention_days` within bounds
/// - stage ids are unique
/// - every `depends_on` names another existing stage
/// - the stage graph has no cycles
/// - rule priorities are within 1..=10 and patterns compile
///
/// It does **not** check registration order; the orchestrator does that
/// when the pipeline is assembled.
pub fn validate_config(cfg: &EngineConfig) -> Result<()> {
    validate_pool(cfg)?;
    validate_checkpoint(cfg)?;
    validate_stage_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_rules(cfg)?;
    Ok(())
}

fn validate_pool(cfg: &EngineConfig) -> Result<()> {
    if cfg.pool.max_workers == 0 {
        return Err(SheetflowError::ConfigError(
            "[pool].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.pool.batch_char_budget == 0 {
        return Err(SheetflowError::ConfigError(
            "[pool].batch_char_budget must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_checkpoint(cfg: &EngineConfig) -> Result<()> {
    if cfg.checkpoint.interval_secs == 0 {
        return Err(SheetflowError::ConfigError(
            "[checkpoint].interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.checkpoint.retention_days > CheckpointSection::MAX_RETENTION_DAYS {
        return Err(SheetflowError::ConfigError(format!(
            "[checkpoint].retention_days must be <= {} (got {})",
            CheckpointSection::MAX_RETENTION_DAYS,
            cfg.checkpoint.retention_days
        )));
    }
    Ok(())
}

fn validate_stage_dependencies(cfg: &EngineConfig) -> Result<()> {
    let mut ids: HashSet<&str> = HashSet::new();
    for stage in &cfg.stages {
        if !ids.insert(stage.id.as_str()) {
            return Err(SheetflowError::ConfigError(format!(
                "duplicate stage id '{}'",
                stage.id
            )));
        }
    }

    for stage in &cfg.stages {
        for dep in &stage.depends_on {
            if dep == &stage.id {
                return Err(SheetflowError::ConfigError(format!(
                    "stage '{}' cannot depend on itself",
                    stage.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(SheetflowError::ConfigError(format!(
                    "stage '{}' has unknown dependency '{}' in `depends_on`",
                    stage.id, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &EngineConfig) -> Result<()> {
    // Edge direction: dep -> stage.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for stage in &cfg.stages {
        graph.add_node(stage.id.as_str());
    }
    for stage in &cfg.stages {
        for dep in &stage.depends_on {
            graph.add_edge(dep.as_str(), stage.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SheetflowError::CircularDependency(format!(
            "cycle detected in stage graph involving stage '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_rules(cfg: &EngineConfig) -> Result<()> {
    for stage in &cfg.stages {
        for rule in &stage.rules {
            if let Some(p) = rule.priority() {
                if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
                    return Err(SheetflowError::ConfigError(format!(
                        "stage '{}': {} rule priority {} is outside {}..={}",
                        stage.id,
                        rule.kind(),
                        p,
                        MIN_PRIORITY,
                        MAX_PRIORITY
                    )));
                }
            }
            if let RuleConfig::Pattern { pattern, .. } = rule {
                regex::Regex::new(pattern).map_err(|e| {
                    SheetflowError::ConfigError(format!(
                        "stage '{}': invalid pattern '{}': {}",
                        stage.id, pattern, e
                    ))
                })?;
            }
        }
    }
    Ok(())
}
