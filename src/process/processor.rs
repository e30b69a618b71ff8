// src/process/processor.rs

//! The `Processor` contract and a trivial built-in implementation.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Result};

use crate::process::context::ProcessContext;
use crate::task::Task;

/// Boxed, `Send` future used at every async trait seam in the crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a processor produced for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub text: String,
    pub confidence: Option<f64>,
}

impl ProcessOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Maps one task (plus read-only context) to a result.
///
/// Implementations must not mutate the task or the context; they only read
/// them. Any error is recorded on the task as a failure by the caller.
pub trait Processor: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<ProcessOutput>>;
}

/// Input text for a task: the dependency's result when there is one,
/// otherwise the task's own source text.
pub fn effective_input<'a>(task: &'a Task, ctx: &'a ProcessContext) -> Result<&'a str> {
    let text = ctx
        .dependency_result(task)
        .unwrap_or(task.source_text.as_str());
    if text.trim().is_empty() {
        return Err(anyhow!(
            "task '{}' has no input text (depends_on = {:?})",
            task.task_id,
            task.depends_on
        ));
    }
    Ok(text)
}

/// Upper-cases its input. Handy for wiring checks and demos.
#[derive(Debug, Clone, Default)]
pub struct UppercaseProcessor;

impl Processor for UppercaseProcessor {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, Result<ProcessOutput>> {
        Box::pin(async move {
            let input = effective_input(task, ctx)?;
            Ok(ProcessOutput::new(input.to_uppercase()).with_confidence(1.0))
        })
    }
}
