// src/task/mod.rs

//! Units of work and the table that holds them.

pub mod model;
pub mod table;

pub use model::{Task, TaskIdGenerator, TaskStatus, MAX_PRIORITY, MIN_PRIORITY};
pub use table::{TaskCounts, TaskTable};
