//! Crash-surviving key/value storage for orchestrator state.

mod snapshot;
mod sqlite;

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

pub use snapshot::{PersistedState, StateSnapshot};
pub use sqlite::SqliteStateStore;

/// Error type for state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned")]
    Lock,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Key/value store holding JSON blobs.
///
/// Writes are last-writer-wins; the orchestrator serializes all of its writes.
pub trait StateStore: Send + Sync {
    /// Fetch the given keys. Missing keys are absent from the result.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StoreError>;

    /// Write all entries atomically.
    fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError>;

    /// Delete the given keys. Unknown keys are ignored.
    fn remove(&self, keys: &[String]) -> Result<(), StoreError>;
}
