// src/data/mod.rs

//! Tabular dataset model.
//!
//! - [`cell`] holds the `Cell` value object and its `CellKey` identity.
//! - [`state`] holds the multi-sheet `DataState` snapshot.
//! - [`store`] defines the external source-of-truth contract.

pub mod cell;
pub mod state;
pub mod store;

pub use cell::{Cell, CellKey};
pub use state::{DataState, Sheet};
pub use store::{DataStore, InMemoryDataStore};
