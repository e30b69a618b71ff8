// src/process/mod.rs

//! Task execution against a dataset.
//!
//! - [`processor`] defines the `Processor` contract (task + context → text).
//! - [`context`] holds the read-only `ProcessContext`.
//! - [`capability`] adapts an external processing service into a `Processor`.
//! - [`transformer`] runs a task table sequentially against a state copy.

pub mod capability;
pub mod context;
pub mod processor;
pub mod transformer;

pub use capability::{
    CapabilityProcessor, CapabilityRequest, CapabilityResponse, ProcessingCapability, Usage,
};
pub use context::{ProcessContext, TaskObserver};
pub use processor::{effective_input, BoxFuture, ProcessOutput, Processor, UppercaseProcessor};
pub use transformer::{merge_results, Transformer};
