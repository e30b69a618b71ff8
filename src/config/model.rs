// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::checkpoint::CheckpointConfig;
use crate::errors::{Result, SheetflowError};
use crate::logging::LogLevel;
use crate::pipeline::{Orchestrator, PipelineStage, StageExecutor};
use crate::pool::PoolConfig;
use crate::split::{
    BatchAllocator, ColorMarkedRule, DerivedRule, EmptyCellRule, PatternRule, SplitRule,
};

/// Top-level engine configuration as read from a TOML file.
///
/// ```toml
/// [pool]
/// max_workers = 5
/// max_retries = 3
///
/// [checkpoint]
/// dir = ".sheetflow/checkpoints"
///
/// [[stage]]
/// id = "translate"
/// [[stage.rule]]
/// kind = "empty_cell"
/// source_column = "CH"
/// target_columns = ["EN"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pool: PoolSection,

    #[serde(default)]
    pub checkpoint: CheckpointSection,

    #[serde(default)]
    pub logging: LoggingSection,

    /// Stages in execution order, from `[[stage]]`.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl EngineConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_workers: self.pool.max_workers.max(1),
            max_retries: self.pool.max_retries,
            retry_cooldown: Duration::from_millis(self.pool.retry_cooldown_ms),
            dequeue_timeout: Duration::from_millis(self.pool.dequeue_timeout_ms),
            deferred_operations: self.pool.deferred_operations.iter().cloned().collect(),
        }
    }

    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            dir: self.checkpoint.dir.clone(),
            interval: Duration::from_secs(self.checkpoint.interval_secs),
            retention: Duration::from_secs(
                self.checkpoint.retention_days.saturating_mul(SECS_PER_DAY),
            ),
        }
    }

    pub fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Assemble an orchestrator with every configured stage, in file order,
    /// all sharing `executor`.
    pub fn build_orchestrator(&self, executor: Arc<dyn StageExecutor>) -> Result<Orchestrator> {
        let mut orchestrator = Orchestrator::new().with_batch_char_budget(self.pool.batch_char_budget);
        for stage in &self.stages {
            let mut built = PipelineStage::new(stage.id.as_str(), Arc::clone(&executor))
                .with_rules(stage.build_rules()?)
                .depends_on(stage.depends_on.iter().cloned());
            built.metadata = stage.metadata.clone();
            orchestrator.add_stage(built);
        }
        Ok(orchestrator)
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_cooldown_ms")]
    pub retry_cooldown_ms: u64,

    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    /// Upper bound on the summed source characters of one batch.
    #[serde(default = "default_batch_char_budget")]
    pub batch_char_budget: usize,

    /// Operations routed to the deferred queue.
    #[serde(default = "default_deferred_operations")]
    pub deferred_operations: Vec<String>,
}

fn default_max_workers() -> usize {
    PoolConfig::DEFAULT_MAX_WORKERS
}

fn default_max_retries() -> u32 {
    PoolConfig::DEFAULT_MAX_RETRIES
}

fn default_retry_cooldown_ms() -> u64 {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    100
}

fn default_batch_char_budget() -> usize {
    BatchAllocator::DEFAULT_CHAR_BUDGET
}

fn default_deferred_operations() -> Vec<String> {
    PoolConfig::default().deferred_operations.into_iter().collect()
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            retry_cooldown_ms: default_retry_cooldown_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            batch_char_budget: default_batch_char_budget(),
            deferred_operations: default_deferred_operations(),
        }
    }
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,

    /// Autosave period.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

impl CheckpointSection {
    /// Longest retention `validate_config` accepts.
    pub const MAX_RETENTION_DAYS: u64 = 36_500;
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".sheetflow/checkpoints")
}

fn default_interval_secs() -> u64 {
    60
}

fn default_retention_days() -> u64 {
    7
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            interval_secs: default_interval_secs(),
            retention_days: default_retention_days(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    /// Falls back to `SHEETFLOW_LOG`, then `info`, when absent.
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// One `[[stage]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub id: String,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleConfig>,
}

impl StageConfig {
    pub fn build_rules(&self) -> Result<Vec<Arc<dyn SplitRule>>> {
        self.rules.iter().map(RuleConfig::build).collect()
    }
}

/// A `[[stage.rule]]` entry, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfig {
    EmptyCell {
        source_column: String,
        #[serde(default)]
        target_columns: Vec<String>,
        #[serde(default)]
        source_lang: Option<String>,
        #[serde(default)]
        priority: Option<u8>,
    },
    ColorMarked {
        color: String,
        source_column: String,
        #[serde(default)]
        target_columns: Vec<String>,
        /// `retranslate` (default) or `shorten`; anything else is used as
        /// the operation name with retranslate behaviour.
        #[serde(default)]
        operation: Option<String>,
        #[serde(default)]
        source_lang: Option<String>,
        #[serde(default)]
        priority: Option<u8>,
    },
    Derived {
        from_column: String,
        target_columns: Vec<String>,
        #[serde(default)]
        priority: Option<u8>,
    },
    Pattern {
        pattern: String,
        operation: String,
        priority: u8,
        #[serde(default)]
        columns: Vec<String>,
    },
}

impl RuleConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleConfig::EmptyCell { .. } => "empty_cell",
            RuleConfig::ColorMarked { .. } => "color_marked",
            RuleConfig::Derived { .. } => "derived",
            RuleConfig::Pattern { .. } => "pattern",
        }
    }

    pub fn priority(&self) -> Option<u8> {
        match self {
            RuleConfig::EmptyCell { priority, .. }
            | RuleConfig::ColorMarked { priority, .. }
            | RuleConfig::Derived { priority, .. } => *priority,
            RuleConfig::Pattern { priority, .. } => Some(*priority),
        }
    }

    pub fn build(&self) -> Result<Arc<dyn SplitRule>> {
        let rule: Arc<dyn SplitRule> = match self {
            RuleConfig::EmptyCell {
                source_column,
                target_columns,
                source_lang,
                priority,
            } => {
                let mut rule = EmptyCellRule::new(source_column.as_str(), target_columns.iter().cloned());
                if let Some(lang) = source_lang {
                    rule = rule.with_source_lang(lang.as_str());
                }
                if let Some(p) = priority {
                    rule = rule.with_priority(*p);
                }
                Arc::new(rule)
            }
            RuleConfig::ColorMarked {
                color,
                source_column,
                target_columns,
                operation,
                source_lang,
                priority,
            } => {
                let targets = target_columns.iter().cloned();
                let mut rule = match operation.as_deref() {
                    Some("shorten") => ColorMarkedRule::shorten(color.as_str(), source_column.as_str(), targets),
                    Some(other) => ColorMarkedRule::retranslate(color.as_str(), source_column.as_str(), targets)
                        .with_operation(other),
                    None => ColorMarkedRule::retranslate(color.as_str(), source_column.as_str(), targets),
                };
                if let Some(lang) = source_lang {
                    rule = rule.with_source_lang(lang.as_str());
                }
                if let Some(p) = priority {
                    rule = rule.with_priority(*p);
                }
                Arc::new(rule)
            }
            RuleConfig::Derived {
                from_column,
                target_columns,
                priority,
            } => {
                let mut rule = DerivedRule::new(from_column.as_str(), target_columns.iter().cloned());
                if let Some(p) = priority {
                    rule = rule.with_priority(*p);
                }
                Arc::new(rule)
            }
            RuleConfig::Pattern {
                pattern,
                operation,
                priority,
                columns,
            } => {
                let rule = PatternRule::new(pattern, operation.as_str(), *priority)
                    .map_err(|e| SheetflowError::ConfigError(format!("{e:#}")))?
                    .in_columns(columns.iter().cloned());
                Arc::new(rule)
            }
        };
        Ok(rule)
    }
}
