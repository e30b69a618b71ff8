// src/split/mod.rs

//! Cell classification: turning a `DataState` into a task table.
//!
//! - [`rule`] defines the `SplitRule` contract and the per-cell context.
//! - [`rules`] holds the built-in rules.
//! - [`splitter`] runs the rules over every cell with priority ordering and
//!   per-cell mutual exclusivity.
//! - [`batch`] packs the resulting tasks into char-budgeted batches.

pub mod batch;
pub mod rule;
pub mod rules;
pub mod splitter;

pub use batch::{BatchAllocator, BatchAssignment};
pub use rule::{SplitContext, SplitRule};
pub use rules::{
    ColorMarkedRule, DerivedRule, EmptyCellRule, PatternRule, SourceMode, OP_DERIVE, OP_NORMAL,
    OP_RETRANSLATE, OP_SHORTEN,
};
pub use splitter::{SplitOutcome, TaskSplitter};
