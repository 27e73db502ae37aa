//! Orchestrator state as persisted in the key/value store.

use std::collections::{HashMap, VecDeque};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::{StateStore, StoreError};
use crate::job::{Job, JobRecord};

const QUEUE_KEY: &str = "batch_queue";
const ACTIVE_KEY: &str = "active_jobs";
const RESULTS_KEY: &str = "processed_results";
const PROCESSING_KEY: &str = "is_processing";
const PAUSED_KEY: &str = "is_paused";

const ALL_KEYS: [&str; 5] = [QUEUE_KEY, ACTIVE_KEY, RESULTS_KEY, PROCESSING_KEY, PAUSED_KEY];

/// State read back at startup.
///
/// Missing keys and unreadable entries are skipped so that a first run, or a
/// store written by an older version, still loads.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub pending: Vec<Job>,
    /// Jobs that were running when the state was written.
    pub active: Vec<Job>,
    pub results: Vec<JobRecord>,
    pub paused: bool,
    pub busy: bool,
}

impl PersistedState {
    pub fn load(store: &dyn StateStore) -> Result<Self, StoreError> {
        let mut values = store.get(&ALL_KEYS)?;
        Ok(Self {
            pending: decode_list(&mut values, QUEUE_KEY),
            active: decode_list(&mut values, ACTIVE_KEY),
            results: decode_list(&mut values, RESULTS_KEY),
            paused: decode_flag(&mut values, PAUSED_KEY),
            busy: decode_flag(&mut values, PROCESSING_KEY),
        })
    }
}

/// Borrowed view of the live state, written after every mutation.
#[derive(Debug)]
pub struct StateSnapshot<'a> {
    pub pending: &'a VecDeque<Job>,
    pub active: Vec<&'a Job>,
    pub results: &'a [JobRecord],
    pub paused: bool,
    pub busy: bool,
}

impl StateSnapshot<'_> {
    pub fn save(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        store.set(vec![
            (QUEUE_KEY.to_string(), serde_json::to_value(self.pending)?),
            (ACTIVE_KEY.to_string(), serde_json::to_value(&self.active)?),
            (RESULTS_KEY.to_string(), serde_json::to_value(self.results)?),
            (PROCESSING_KEY.to_string(), Value::Bool(self.busy)),
            (PAUSED_KEY.to_string(), Value::Bool(self.paused)),
        ])
    }
}

fn decode_list<T: DeserializeOwned>(values: &mut HashMap<String, Value>, key: &str) -> Vec<T> {
    match values.remove(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key, "Dropping unreadable persisted entry: {}", e);
                    None
                }
            })
            .collect(),
        Some(_) => {
            warn!(key, "Persisted value is not a list, ignoring");
            Vec::new()
        }
    }
}

fn decode_flag(values: &mut HashMap<String, Value>, key: &str) -> bool {
    values
        .remove(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobOptions, JobPayload};
    use crate::store::SqliteStateStore;
    use serde_json::json;

    #[test]
    fn test_load_empty_store() {
        let store = SqliteStateStore::in_memory().unwrap();
        let state = PersistedState::load(&store).unwrap();
        assert!(state.pending.is_empty());
        assert!(state.active.is_empty());
        assert!(state.results.is_empty());
        assert!(!state.paused);
        assert!(!state.busy);
    }

    #[test]
    fn test_save_then_load() {
        let store = SqliteStateStore::in_memory().unwrap();
        let running = Job::new("https://a.example/1", None, JobKind::Content, JobOptions::new());
        let pending: VecDeque<Job> = vec![Job::new(
            "https://a.example/2",
            Some("Second".into()),
            JobKind::PackagedArchive,
            JobOptions::new().with("imageMode", "local"),
        )]
        .into();
        let results = vec![JobRecord::success(
            &running,
            "First".into(),
            5,
            JobPayload::Content {
                content: "hello".into(),
                images: vec![],
            },
        )];

        StateSnapshot {
            pending: &pending,
            active: vec![&running],
            results: &results,
            paused: true,
            busy: true,
        }
        .save(&store)
        .unwrap();

        let state = PersistedState::load(&store).unwrap();
        assert_eq!(state.pending, Vec::from(pending));
        assert_eq!(state.active, vec![running]);
        assert_eq!(state.results, results);
        assert!(state.paused);
        assert!(state.busy);
    }

    #[test]
    fn test_load_skips_unreadable_entries() {
        let store = SqliteStateStore::in_memory().unwrap();
        let job = Job::new("https://a.example/ok", None, JobKind::Content, JobOptions::new());
        store
            .set(vec![
                (
                    QUEUE_KEY.to_string(),
                    json!([serde_json::to_value(&job).unwrap(), { "garbage": 1 }]),
                ),
                (RESULTS_KEY.to_string(), json!("not a list")),
                (PAUSED_KEY.to_string(), json!("yes")),
            ])
            .unwrap();

        let state = PersistedState::load(&store).unwrap();
        assert_eq!(state.pending, vec![job]);
        assert!(state.results.is_empty());
        assert!(!state.paused);
    }
}
