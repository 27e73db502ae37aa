//! Types for the batch orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{ContextError, ExtractError, RenderError};
use crate::job::{JobKind, JobOptions, ResultSummary};
use crate::queue::ActiveJobView;
use crate::store::StoreError;

/// Errors returned by orchestrator commands.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No job or result for the target.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Retry requested for a target whose result is not a failure.
    #[error("job is not failed: {0}")]
    NotFailed(String),

    /// Enqueue called without any usable item.
    #[error("no items to enqueue")]
    NoItems,

    /// State store error.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// The orchestrator loop is no longer running.
    #[error("orchestrator unavailable")]
    Unavailable,
}

/// Why a single job did not produce a result.
#[derive(Debug, Error)]
pub enum JobError {
    /// Opening the page context failed. Not retried.
    #[error("{0}")]
    ContextAcquisition(#[from] ContextError),

    /// Extraction failed after the attempt budget, or with a non-retryable kind.
    #[error("{0}")]
    Extraction(#[from] ExtractError),

    /// Rendering the extracted markup failed.
    #[error("{0}")]
    Render(#[from] RenderError),

    /// An archive job returned neither an inline archive nor a stored one.
    #[error("Local archive generation failed")]
    MissingArchive,

    /// The job was cancelled by the operator or by shutdown.
    #[error("Cancelled")]
    Cancelled,
}

/// One entry of an enqueue request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueItem {
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Overrides the request-wide kind.
    #[serde(default)]
    pub kind: Option<JobKind>,
}

impl EnqueueItem {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            label: None,
            kind: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A batch of targets sharing one option bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub items: Vec<EnqueueItem>,
    #[serde(default)]
    pub kind: JobKind,
    #[serde(default)]
    pub options: JobOptions,
}

/// Result of an enqueue command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    /// Jobs actually added; duplicates are skipped.
    pub added: usize,
    pub pending_count: usize,
}

/// Controller limits after a ceiling change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    pub configured_ceiling: usize,
    pub effective_ceiling: usize,
    pub hard_max: usize,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    pub paused: bool,
    /// Anything pending or running.
    pub busy: bool,
    pub pending_count: usize,
    pub active_count: usize,
    /// Size-only projections of completed jobs.
    pub results: Vec<ResultSummary>,
    /// The longest-running active job.
    pub current_job: Option<ActiveJobView>,
    pub active_jobs: Vec<ActiveJobView>,
    pub configured_ceiling: usize,
    pub effective_ceiling: usize,
    pub throttle_level: usize,
    pub in_cooldown: bool,
    pub stored_bytes: u64,
}
