// src/process/capability.rs

//! Adapter between the engine and an external text-processing service.
//!
//! The engine does not care how the service is reached (HTTP, RPC,
//! in-process). It only needs [`ProcessingCapability::process`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::process::context::ProcessContext;
use crate::process::processor::{effective_input, BoxFuture, ProcessOutput, Processor};
use crate::task::Task;

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityResponse {
    pub text: String,
    pub confidence: Option<f64>,
    pub usage: Usage,
    /// Non-empty means the service rejected the request.
    pub error: Option<String>,
}

/// External, possibly slow and unreliable, processing service.
pub trait ProcessingCapability: Send + Sync + Debug {
    fn process(&self, request: CapabilityRequest) -> BoxFuture<'_, Result<CapabilityResponse>>;
}

/// [`Processor`] backed by a [`ProcessingCapability`].
///
/// The request context carries the operation, target column, stage and any
/// stage metadata, so one service can serve every rule type.
#[derive(Debug)]
pub struct CapabilityProcessor {
    capability: Arc<dyn ProcessingCapability>,
    usage: Mutex<Usage>,
}

impl CapabilityProcessor {
    pub fn new(capability: Arc<dyn ProcessingCapability>) -> Self {
        Self {
            capability,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Accumulated usage across every call made through this processor.
    pub fn usage(&self) -> Usage {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn build_request(task: &Task, ctx: &ProcessContext) -> Result<CapabilityRequest> {
        let text = effective_input(task, ctx)?.to_string();

        let mut context: BTreeMap<String, String> = (*ctx.metadata).clone();
        context.insert("operation".into(), task.operation.clone());
        context.insert("column".into(), task.column_name.clone());
        context.insert("sheet".into(), task.sheet.clone());
        context.insert("task_id".into(), task.task_id.clone());
        if !ctx.stage_id.is_empty() {
            context.insert("stage".into(), ctx.stage_id.clone());
        }
        if let Some(dep) = task.depends_on.as_ref() {
            context.insert("depends_on".into(), dep.clone());
        }
        if task.retry_count > 0 {
            context.insert("attempt".into(), (task.retry_count + 1).to_string());
        }

        Ok(CapabilityRequest {
            text,
            source_lang: task.source_lang.clone(),
            target_lang: task.target_lang.clone(),
            context,
        })
    }
}

impl Processor for CapabilityProcessor {
    fn name(&self) -> &str {
        "capability"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<ProcessOutput>> {
        Box::pin(async move {
            let request = Self::build_request(task, ctx)?;
            debug!(
                task = %task.task_id,
                operation = %task.operation,
                chars = request.text.chars().count(),
                "calling processing capability"
            );

            let response = self.capability.process(request).await?;

            self.usage
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .add(response.usage);

            if let Some(err) = response.error.as_deref().filter(|e| !e.trim().is_empty()) {
                warn!(task = %task.task_id, error = %err, "capability reported an error");
                return Err(anyhow!("capability error: {err}"));
            }
            if response.text.trim().is_empty() {
                return Err(anyhow!("capability returned empty text"));
            }

            Ok(ProcessOutput {
                text: response.text,
                confidence: response.confidence,
            })
        })
    }
}
