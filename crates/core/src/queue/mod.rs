//! Pending queue, active registry, cancelled set and result list.
//!
//! Owned exclusively by the orchestrator loop; nothing here is shared.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backend::ContextHandle;
use crate::job::{Job, JobProgress, JobRecord, JobStatus, ProgressUpdate, ResultSummary};
use crate::store::StateSnapshot;

/// A job that has been claimed by a runner.
#[derive(Debug)]
pub struct ActiveJob {
    pub job: Job,
    pub request_id: String,
    pub context: Option<ContextHandle>,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Serializable view of a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveJobView {
    pub target: String,
    pub label: String,
    pub kind: crate::job::JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
}

impl From<&ActiveJob> for ActiveJobView {
    fn from(active: &ActiveJob) -> Self {
        Self {
            target: active.job.target.clone(),
            label: active.job.label.clone(),
            kind: active.job.kind,
            status: active.job.status,
            started_at: active.started_at,
            progress: active.job.progress.clone(),
        }
    }
}

/// What happened to an active entry when its runner reported back.
#[derive(Debug)]
pub struct FinishedJob {
    pub active: ActiveJob,
    /// The job was cancelled by the operator; its outcome must be discarded.
    pub cancelled: bool,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<Job>,
    active: HashMap<String, ActiveJob>,
    cancelled: HashSet<String>,
    results: Vec<JobRecord>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted state.
    ///
    /// Jobs that were running go back to the head of the queue, ahead of the
    /// jobs that were still waiting.
    pub fn restore(interrupted: Vec<Job>, pending: Vec<Job>, results: Vec<JobRecord>) -> Self {
        let mut queue = Self {
            results,
            ..Self::default()
        };
        for mut job in interrupted.into_iter().chain(pending) {
            if queue.is_queued(&job.target) {
                continue;
            }
            job.status = JobStatus::Pending;
            job.progress = None;
            queue.pending.push_back(job);
        }
        queue
    }

    pub fn is_active(&self, target: &str) -> bool {
        self.active.contains_key(target)
    }

    pub fn is_pending(&self, target: &str) -> bool {
        self.pending.iter().any(|j| j.target == target)
    }

    /// Whether the target is waiting or running. A cancelled job that has not
    /// reported back yet does not count.
    pub fn is_queued(&self, target: &str) -> bool {
        (self.is_active(target) && !self.is_cancelled(target)) || self.is_pending(target)
    }

    /// Append jobs whose targets are not already pending or active.
    ///
    /// A previous result for an accepted target is superseded and returned so
    /// the caller can release anything it references.
    pub fn enqueue(&mut self, jobs: Vec<Job>) -> (usize, Vec<JobRecord>) {
        let mut added = 0;
        let mut superseded = Vec::new();
        for job in jobs {
            if self.is_queued(&job.target) {
                continue;
            }
            superseded.extend(self.take_results(&job.target));
            self.pending.push_back(job);
            added += 1;
        }
        (added, superseded)
    }

    /// Take the first pending job whose target has no runner left over.
    ///
    /// A target re-enqueued while its cancelled runner is still winding down
    /// waits until that runner reports back.
    pub fn pop_pending(&mut self) -> Option<Job> {
        let idx = self
            .pending
            .iter()
            .position(|j| !self.active.contains_key(&j.target))?;
        self.pending.remove(idx)
    }

    /// Register a claimed job as active.
    pub fn start(&mut self, mut job: Job, request_id: String, cancel: CancellationToken) {
        job.status = JobStatus::Processing;
        job.progress = Some(JobProgress::starting(job.kind));
        self.cancelled.remove(&job.target);
        self.active.insert(
            job.target.clone(),
            ActiveJob {
                job,
                request_id,
                context: None,
                started_at: Utc::now(),
                cancel,
            },
        );
    }

    /// Record the context handle of a running job.
    ///
    /// Returns false when the job is gone or already cancelled, in which case
    /// the caller owns tearing the context down.
    pub fn attach_context(&mut self, target: &str, handle: ContextHandle) -> bool {
        if self.cancelled.contains(target) {
            return false;
        }
        match self.active.get_mut(target) {
            Some(active) => {
                active.context = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Mark an active job as cancelled and signal its runner.
    ///
    /// Returns its context handle, if one was attached.
    pub fn cancel(&mut self, target: &str) -> Option<ContextHandle> {
        let active = self.active.get(target)?;
        self.cancelled.insert(target.to_string());
        active.cancel.cancel();
        active.context.clone()
    }

    /// Cancel every active job. Pending jobs are untouched.
    pub fn cancel_all(&mut self) -> Vec<ContextHandle> {
        let targets: Vec<String> = self.active.keys().cloned().collect();
        targets
            .iter()
            .filter_map(|target| self.cancel(target))
            .collect()
    }

    pub fn is_cancelled(&self, target: &str) -> bool {
        self.cancelled.contains(target)
    }

    /// Remove a job from the active registry once its runner reported back.
    pub fn finish(&mut self, target: &str) -> Option<FinishedJob> {
        let active = self.active.remove(target)?;
        let cancelled = self.cancelled.remove(target);
        Some(FinishedJob { active, cancelled })
    }

    pub fn push_result(&mut self, record: JobRecord) {
        self.results.push(record);
    }

    /// Remove a target from the pending queue and the results.
    ///
    /// Returns the removed results.
    pub fn remove(&mut self, target: &str) -> Vec<JobRecord> {
        self.pending.retain(|j| j.target != target);
        self.take_results(target)
    }

    /// Take the failed result for a target, if its result is a failure.
    pub fn take_failed(&mut self, target: &str) -> Option<JobRecord> {
        let idx = self
            .results
            .iter()
            .position(|r| r.target == target && r.is_failed())?;
        let record = self.results.remove(idx);
        self.results.retain(|r| r.target != target);
        Some(record)
    }

    /// Take every failed result.
    pub fn take_all_failed(&mut self) -> Vec<JobRecord> {
        let (failed, kept) = std::mem::take(&mut self.results)
            .into_iter()
            .partition(|r| r.is_failed());
        self.results = kept;
        failed
    }

    /// Empty the pending queue and results. Active jobs stay registered until
    /// their runners report back.
    pub fn clear(&mut self) -> Vec<JobRecord> {
        self.pending.clear();
        std::mem::take(&mut self.results)
    }

    /// Merge a progress update into the matching active job.
    ///
    /// Returns false when no active job matches.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> bool {
        let target = match (&update.target, &update.request_id) {
            (Some(target), _) if self.active.contains_key(target) => target.clone(),
            (_, Some(request_id)) => match self
                .active
                .values()
                .find(|a| &a.request_id == request_id)
            {
                Some(active) => active.job.target.clone(),
                None => return false,
            },
            _ => return false,
        };
        match self.active.get_mut(&target) {
            Some(active) => {
                active
                    .job
                    .progress
                    .get_or_insert_with(JobProgress::default)
                    .apply(update);
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.active.is_empty() || !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Job> {
        self.pending.iter()
    }

    pub fn results(&self) -> &[JobRecord] {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut [JobRecord] {
        &mut self.results
    }

    /// Total size of stored results.
    pub fn stored_bytes(&self) -> u64 {
        self.results.iter().map(|r| r.result_size).sum()
    }

    /// Running jobs, oldest first.
    pub fn active_views(&self) -> Vec<ActiveJobView> {
        let mut views: Vec<ActiveJobView> = self.active.values().map(ActiveJobView::from).collect();
        views.sort_by_key(|v| v.started_at);
        views
    }

    pub fn summaries(&self) -> Vec<ResultSummary> {
        self.results.iter().map(JobRecord::summary).collect()
    }

    /// Full records for the given targets, in result order.
    pub fn full_results(&self, targets: &[String]) -> Vec<JobRecord> {
        self.results
            .iter()
            .filter(|r| targets.iter().any(|t| t == &r.target))
            .cloned()
            .collect()
    }

    /// Cancelled jobs are left out of the active set; they never come back.
    pub fn snapshot(&self, paused: bool) -> StateSnapshot<'_> {
        StateSnapshot {
            pending: &self.pending,
            active: self
                .active
                .values()
                .filter(|a| !self.cancelled.contains(&a.job.target))
                .map(|a| &a.job)
                .collect(),
            results: &self.results,
            paused,
            busy: self.is_busy(),
        }
    }

    fn take_results(&mut self, target: &str) -> Vec<JobRecord> {
        let (taken, kept) = std::mem::take(&mut self.results)
            .into_iter()
            .partition(|r| r.target == target);
        self.results = kept;
        taken
    }
}
