//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the collaborator traits,
//! allowing the orchestrator to be driven end to end without a real page agent.
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_core::testing::{MockContextProvider, MockExtractionBackend, MockRenderBackend};
//!
//! let contexts = Arc::new(MockContextProvider::new());
//! let extractor = Arc::new(MockExtractionBackend::new());
//! let renderer = Arc::new(MockRenderBackend::new());
//!
//! extractor.set_delay("https://a.example/slow", Duration::from_secs(5)).await;
//! let backends = PageBackends::new(contexts.clone(), extractor.clone(), renderer.clone());
//! ```

mod mock_contexts;
mod mock_extraction;
mod mock_render;

pub use mock_contexts::MockContextProvider;
pub use mock_extraction::{MockExtractionBackend, RecordedExtraction};
pub use mock_render::{MockRenderBackend, RecordedRender};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::{JobKind, JobOptions};
    use crate::orchestrator::{BatchConfig, EnqueueItem, EnqueueRequest};

    /// Batch tunables with every delay shortened for tests.
    pub fn fast_batch_config() -> BatchConfig {
        BatchConfig {
            cooldown_ms: 200,
            load_timeout_ms: 200,
            settle_delay_ms: 0,
            extract_timeout_ms: 1_000,
            extract_timeout_local_archive_ms: 2_000,
            retry_delay_ms: 5,
            backfill_delay_ms: 5,
            progress_persist_interval_ms: 50,
            ..Default::default()
        }
    }

    /// Enqueue request for content jobs with default options.
    pub fn content_request(targets: &[&str]) -> EnqueueRequest {
        request(targets, JobKind::Content, JobOptions::new())
    }

    /// Enqueue request with explicit kind and shared options.
    pub fn request(targets: &[&str], kind: JobKind, options: JobOptions) -> EnqueueRequest {
        EnqueueRequest {
            items: targets.iter().map(|t| EnqueueItem::new(*t)).collect(),
            kind,
            options,
        }
    }

    /// Shared options carrying a concurrency hint.
    pub fn options_with_ceiling(ceiling: i64) -> JobOptions {
        JobOptions::new().with(crate::job::CONCURRENCY_HINT_KEY, ceiling)
    }
}
