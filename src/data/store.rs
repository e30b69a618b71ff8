// src/data/store.rs

//! Source-of-truth abstraction.
//!
//! File formats (spreadsheets, colour-code decoding) live outside the engine.
//! Anything that can produce and accept a [`DataState`] can back a pipeline.

use std::fmt::Debug;
use std::sync::Mutex;

use crate::data::state::DataState;
use crate::errors::Result;

pub trait DataStore: Send + Sync + Debug {
    fn load(&self) -> Result<DataState>;
    fn save(&self, state: &DataState) -> Result<()>;
}

/// Keeps the dataset in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    state: Mutex<DataState>,
}

impl InMemoryDataStore {
    pub fn new(state: DataState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl DataStore for InMemoryDataStore {
    fn load(&self) -> Result<DataState> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.copy())
    }

    fn save(&self, state: &DataState) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = state.copy();
        Ok(())
    }
}
