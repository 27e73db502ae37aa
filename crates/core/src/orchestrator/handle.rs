//! Cloneable front door to the orchestrator loop.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{RenderBackend, RenderError, RenderedDocument};
use crate::job::{JobRecord, ProgressUpdate};
use crate::store::StateStore;

use super::types::{
    ConcurrencySnapshot, EnqueueOutcome, EnqueueRequest, OrchestratorError, OrchestratorStatus,
};

type Reply<T> = oneshot::Sender<T>;

/// Commands processed by the orchestrator loop, one at a time.
#[derive(Debug)]
pub(crate) enum Command {
    Enqueue {
        request: EnqueueRequest,
        reply: Reply<Result<EnqueueOutcome, OrchestratorError>>,
    },
    SetConcurrency {
        ceiling: i64,
        reply: Reply<ConcurrencySnapshot>,
    },
    Status {
        reply: Reply<OrchestratorStatus>,
    },
    FullResults {
        targets: Vec<String>,
        reply: Reply<Vec<JobRecord>>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    ClearAll {
        reply: Reply<()>,
    },
    Delete {
        target: String,
        reply: Reply<Result<(), OrchestratorError>>,
    },
    Retry {
        target: String,
        reply: Reply<Result<(), OrchestratorError>>,
    },
    RetryAllFailed {
        reply: Reply<usize>,
    },
    ReportProgress {
        update: ProgressUpdate,
        reply: Reply<bool>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Handle for issuing commands to the orchestrator.
///
/// This is cheaply cloneable and can be shared across tasks. Every command
/// waits until the loop has applied it and persisted the resulting state.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
    store: Arc<dyn StateStore>,
    renderer: Arc<dyn RenderBackend>,
}

impl OrchestratorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<Command>,
        store: Arc<dyn StateStore>,
        renderer: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            tx,
            store,
            renderer,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| OrchestratorError::Unavailable)?;
        rx.await.map_err(|_| OrchestratorError::Unavailable)
    }

    /// Queue targets. Already pending or running targets are skipped.
    /// Clears the paused flag.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, OrchestratorError> {
        self.request(|reply| Command::Enqueue { request, reply })
            .await?
    }

    /// Set the operator concurrency ceiling; it is clamped to `[1, max]`.
    pub async fn set_concurrency(&self, ceiling: i64) -> Result<ConcurrencySnapshot, OrchestratorError> {
        self.request(|reply| Command::SetConcurrency { ceiling, reply })
            .await
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Complete records, payload included, for the given targets.
    pub async fn full_results(&self, targets: Vec<String>) -> Result<Vec<JobRecord>, OrchestratorError> {
        self.request(|reply| Command::FullResults { targets, reply })
            .await
    }

    /// Stop starting jobs and cancel the running ones.
    pub async fn pause(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Cancel running jobs and drop the queue and every result.
    pub async fn clear_all(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::ClearAll { reply }).await
    }

    /// Remove one target from the queue and results, cancelling it if running.
    pub async fn delete(&self, target: impl Into<String>) -> Result<(), OrchestratorError> {
        let target = target.into();
        self.request(|reply| Command::Delete { target, reply })
            .await?
    }

    /// Requeue a failed target with its original options.
    pub async fn retry(&self, target: impl Into<String>) -> Result<(), OrchestratorError> {
        let target = target.into();
        self.request(|reply| Command::Retry { target, reply })
            .await?
    }

    /// Requeue every failed target. Returns how many were requeued.
    pub async fn retry_all_failed(&self) -> Result<usize, OrchestratorError> {
        self.request(|reply| Command::RetryAllFailed { reply }).await
    }

    /// Merge a progress report into a running job.
    ///
    /// Returns whether a running job matched; unknown jobs are ignored.
    pub async fn report_progress(&self, update: ProgressUpdate) -> Result<bool, OrchestratorError> {
        self.request(|reply| Command::ReportProgress { update, reply })
            .await
    }

    /// Render markup directly, outside the job queue.
    pub async fn render(&self, markup: &str, title: &str) -> Result<RenderedDocument, RenderError> {
        self.renderer.render(markup, title).await
    }

    /// Fetch an archive kept in the state store by reference.
    pub fn archive(&self, key: &str) -> Result<Option<String>, OrchestratorError> {
        let mut values = self.store.get(&[key])?;
        Ok(match values.remove(key) {
            Some(Value::String(data)) => Some(data),
            _ => None,
        })
    }

    /// Stop the loop. Running jobs stay persisted and resume on next start.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
