//! The orchestrator loop.
//!
//! All queue, registry and controller state lives in [`Orchestrator`] and is
//! only touched from [`Orchestrator::run`]. Commands arrive through an
//! [`OrchestratorHandle`]; runners report back through an internal channel.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{ContextHandle, PageBackends};
use crate::controller::ConcurrencyController;
use crate::job::{Job, JobOptions, JobRecord, JobStatus, ProgressUpdate};
use crate::metrics::JOBS_STARTED;
use crate::queue::JobQueue;
use crate::store::{PersistedState, StateStore};

use super::config::BatchConfig;
use super::handle::{Command, OrchestratorHandle};
use super::runner::{JobRunner, RunnerEvent};
use super::types::{
    ConcurrencySnapshot, EnqueueOutcome, EnqueueRequest, JobError, OrchestratorError,
    OrchestratorStatus,
};

/// Owner of all orchestrator state. Spawn [`Orchestrator::run`] as a task.
pub struct Orchestrator {
    config: BatchConfig,
    store: Arc<dyn StateStore>,
    backends: PageBackends,
    queue: JobQueue,
    controller: ConcurrencyController,
    paused: bool,
    /// Busy flag as of the last persist.
    last_busy: bool,
    last_progress_persist: Option<Instant>,
    resume_on_start: bool,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<RunnerEvent>,
    events_rx: mpsc::UnboundedReceiver<RunnerEvent>,
}

/// Create an orchestrator from persisted state.
///
/// Returns:
/// - `OrchestratorHandle` - for issuing commands (clone this to share across tasks)
/// - `Orchestrator` - spawn this as a background task with `tokio::spawn(orchestrator.run())`
///
/// Jobs that were running when the state was written go back to the head of
/// the queue. Draining resumes on its own unless the state was paused.
pub fn create_orchestrator(
    config: BatchConfig,
    store: Arc<dyn StateStore>,
    backends: PageBackends,
) -> Result<(OrchestratorHandle, Orchestrator), OrchestratorError> {
    let persisted = PersistedState::load(store.as_ref())?;

    let mut results = persisted.results;
    let mut backfilled = 0;
    for record in results
        .iter_mut()
        .filter(|r| r.status == JobStatus::Success && r.result_size == 0)
    {
        let size = record.estimated_size();
        if size > 0 {
            record.result_size = size;
            backfilled += 1;
        }
    }

    let interrupted = persisted.active.len();
    let queue = JobQueue::restore(persisted.active, persisted.pending, results);

    let mut controller = ConcurrencyController::new(&config);
    if let Some(hint) = queue.pending().next().and_then(|j| j.options.concurrency_hint()) {
        controller.set_ceiling(hint);
    }

    let paused = persisted.paused;
    let resume_on_start = !paused && queue.has_pending();
    info!(
        pending = queue.pending_len(),
        interrupted,
        results = queue.results().len(),
        paused,
        "Restored orchestrator state"
    );

    if backfilled > 0 || interrupted > 0 {
        info!(backfilled, interrupted, "Rewriting recovered state");
        queue.snapshot(paused).save(store.as_ref())?;
    }

    let (tx, commands) = mpsc::channel(config.command_buffer.max(1));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let handle = OrchestratorHandle::new(tx, Arc::clone(&store), Arc::clone(&backends.renderer));

    let orchestrator = Orchestrator {
        last_busy: persisted.busy,
        config,
        store,
        backends,
        queue,
        controller,
        paused,
        last_progress_persist: None,
        resume_on_start,
        commands,
        events_tx,
        events_rx,
    };
    Ok((handle, orchestrator))
}

impl Orchestrator {
    /// Process commands and runner events until shut down.
    ///
    /// Dropping every handle also shuts the loop down.
    pub async fn run(mut self) {
        info!("Orchestrator started");

        if self.resume_on_start {
            info!(pending = self.queue.pending_len(), "Resuming queued jobs");
            self.schedule();
            self.persist();
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }

        info!("Orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { request, reply } => {
                let _ = reply.send(self.enqueue(request));
            }
            Command::SetConcurrency { ceiling, reply } => {
                let _ = reply.send(self.set_concurrency(ceiling));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::FullResults { targets, reply } => {
                let _ = reply.send(self.queue.full_results(&targets));
            }
            Command::Pause { reply } => {
                self.pause().await;
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.resume();
                let _ = reply.send(());
            }
            Command::ClearAll { reply } => {
                self.clear_all().await;
                let _ = reply.send(());
            }
            Command::Delete { target, reply } => {
                let result = self.delete(&target).await;
                let _ = reply.send(result);
            }
            Command::Retry { target, reply } => {
                let _ = reply.send(self.retry(&target));
            }
            Command::RetryAllFailed { reply } => {
                let _ = reply.send(self.retry_all_failed());
            }
            Command::ReportProgress { update, reply } => {
                let _ = reply.send(self.report_progress(&update));
            }
            // Handled by the loop itself.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn enqueue(&mut self, request: EnqueueRequest) -> Result<EnqueueOutcome, OrchestratorError> {
        let jobs: Vec<Job> = request
            .items
            .into_iter()
            .filter(|item| !item.target.trim().is_empty())
            .map(|item| {
                Job::new(
                    item.target.trim(),
                    item.label,
                    item.kind.unwrap_or(request.kind),
                    request.options.clone(),
                )
            })
            .collect();
        if jobs.is_empty() {
            return Err(OrchestratorError::NoItems);
        }

        self.apply_ceiling_hint(&request.options);
        let requested = jobs.len();
        let (added, superseded) = self.queue.enqueue(jobs);
        self.release_archives(&superseded);
        self.paused = false;

        info!(
            requested,
            added,
            pending = self.queue.pending_len(),
            "Enqueued jobs"
        );
        self.schedule();
        self.persist();

        Ok(EnqueueOutcome {
            added,
            pending_count: self.queue.pending_len(),
        })
    }

    fn set_concurrency(&mut self, ceiling: i64) -> ConcurrencySnapshot {
        self.controller.set_ceiling(ceiling);
        self.schedule();
        self.persist();
        ConcurrencySnapshot {
            configured_ceiling: self.controller.configured_ceiling(),
            effective_ceiling: self
                .controller
                .effective_concurrency(self.queue.stored_bytes()),
            hard_max: self.controller.hard_max(),
        }
    }

    fn status(&mut self) -> OrchestratorStatus {
        let effective_ceiling = self
            .controller
            .effective_concurrency(self.queue.stored_bytes());
        let limits = self.controller.limits();
        let active_jobs = self.queue.active_views();
        OrchestratorStatus {
            paused: self.paused,
            busy: self.queue.is_busy(),
            pending_count: self.queue.pending_len(),
            active_count: self.queue.active_len(),
            results: self.queue.summaries(),
            current_job: active_jobs.first().cloned(),
            active_jobs,
            configured_ceiling: limits.configured,
            effective_ceiling,
            throttle_level: limits.throttle,
            in_cooldown: limits.in_cooldown,
            stored_bytes: self.queue.stored_bytes(),
        }
    }

    async fn pause(&mut self) {
        self.paused = true;
        let handles = self.queue.cancel_all();
        info!(cancelled = self.queue.active_len(), "Orchestrator paused");
        self.close_contexts(handles).await;
        self.persist();
    }

    fn resume(&mut self) {
        self.paused = false;
        info!(pending = self.queue.pending_len(), "Orchestrator resumed");
        self.schedule();
        self.persist();
    }

    async fn clear_all(&mut self) {
        let handles = self.queue.cancel_all();
        let removed = self.queue.clear();
        self.release_archives(&removed);
        self.paused = false;
        info!(results = removed.len(), "Cleared queue and results");
        self.close_contexts(handles).await;
        self.persist();
    }

    async fn delete(&mut self, target: &str) -> Result<(), OrchestratorError> {
        let was_active = self.queue.is_active(target);
        let was_pending = self.queue.is_pending(target);
        let handle = self.queue.cancel(target);
        let removed = self.queue.remove(target);
        if !was_active && !was_pending && removed.is_empty() {
            return Err(OrchestratorError::NotFound(target.to_string()));
        }

        self.release_archives(&removed);
        info!(job = %target, was_active, "Deleted job");
        self.close_contexts(handle.into_iter().collect()).await;
        self.persist();
        Ok(())
    }

    fn retry(&mut self, target: &str) -> Result<(), OrchestratorError> {
        let Some(record) = self.queue.take_failed(target) else {
            return Err(if self.queue.results().iter().any(|r| r.target == target) {
                OrchestratorError::NotFailed(target.to_string())
            } else {
                OrchestratorError::NotFound(target.to_string())
            });
        };

        self.apply_ceiling_hint(&record.options);
        self.queue.enqueue(vec![Job::requeued(&record)]);
        self.paused = false;
        info!(job = %target, "Retrying failed job");
        self.schedule();
        self.persist();
        Ok(())
    }

    fn retry_all_failed(&mut self) -> usize {
        let failed = self.queue.take_all_failed();
        if failed.is_empty() {
            return 0;
        }

        if let Some(options) = failed
            .iter()
            .map(|r| &r.options)
            .find(|o| o.concurrency_hint().is_some())
        {
            let options = options.clone();
            self.apply_ceiling_hint(&options);
        }
        let (added, _) = self
            .queue
            .enqueue(failed.iter().map(Job::requeued).collect());
        self.paused = false;
        info!(count = added, "Retrying all failed jobs");
        self.schedule();
        self.persist();
        added
    }

    fn report_progress(&mut self, update: &ProgressUpdate) -> bool {
        if !self.queue.apply_progress(update) {
            debug!(
                target_id = update.target.as_deref().unwrap_or(""),
                request_id = update.request_id.as_deref().unwrap_or(""),
                "Progress for unknown job ignored"
            );
            return false;
        }

        let now = Instant::now();
        let due = self
            .last_progress_persist
            .map_or(true, |last| now.duration_since(last) >= self.config.progress_persist_interval());
        if update.done || due {
            self.last_progress_persist = Some(now);
            self.persist();
        }
        true
    }

    async fn handle_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::ContextOpened { target, handle } => {
                if !self.queue.attach_context(&target, handle.clone()) {
                    debug!(job = %target, "Context opened for a cancelled job, closing");
                    let contexts = Arc::clone(&self.backends.contexts);
                    tokio::spawn(async move {
                        let _ = contexts.close(&handle).await;
                    });
                }
            }
            RunnerEvent::Finished { target, result } => self.finish(&target, result),
            RunnerEvent::Backfill => {
                if self.schedule() {
                    self.persist();
                }
            }
        }
    }

    fn finish(&mut self, target: &str, result: Result<JobRecord, JobError>) {
        let Some(finished) = self.queue.finish(target) else {
            debug!(job = %target, "Finished job is no longer registered");
            self.discard(result);
            return;
        };

        if finished.cancelled {
            debug!(job = %target, "Discarding outcome of cancelled job");
            self.discard(result);
        } else {
            match result {
                Ok(record) => {
                    self.queue.push_result(record);
                    self.controller.record_outcome(true);
                }
                Err(JobError::Cancelled) => {}
                Err(e) => {
                    self.queue
                        .push_result(JobRecord::failure(&finished.active.job, e.to_string()));
                    self.controller.record_outcome(false);
                }
            }
        }

        self.last_busy = self.queue.is_busy();
        self.persist();

        if !self.paused {
            let events = self.events_tx.clone();
            let delay = self.config.backfill_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(RunnerEvent::Backfill);
            });
        }
    }

    /// Drop an outcome that will not be recorded, with anything it stored.
    fn discard(&self, result: Result<JobRecord, JobError>) {
        if let Ok(record) = result {
            self.release_archives(std::slice::from_ref(&record));
        }
    }

    /// Start pending jobs while slots are free.
    ///
    /// Returns whether anything changed that needs persisting.
    fn schedule(&mut self) -> bool {
        let mut spawned = 0;
        while !self.paused && self.queue.has_pending() {
            let limit = self
                .controller
                .effective_concurrency(self.queue.stored_bytes());
            if self.queue.active_len() >= limit {
                debug!(
                    active = self.queue.active_len(),
                    limit,
                    pending = self.queue.pending_len(),
                    "No free slot"
                );
                break;
            }
            let Some(job) = self.queue.pop_pending() else {
                break;
            };
            self.spawn_runner(job);
            spawned += 1;
        }

        let busy = self.queue.is_busy();
        let changed = spawned > 0 || busy != self.last_busy;
        self.last_busy = busy;
        changed
    }

    fn spawn_runner(&mut self, job: Job) {
        let request_id = format!("batch-{}", Uuid::new_v4());
        let cancel = CancellationToken::new();
        info!(job = %job.target, kind = job.kind.as_str(), %request_id, "Starting job");
        JOBS_STARTED.inc();

        let runner = JobRunner::new(
            job.clone(),
            request_id.clone(),
            self.config.clone(),
            self.backends.clone(),
            Arc::clone(&self.store),
            cancel.clone(),
            self.events_tx.clone(),
        );
        self.queue.start(job, request_id, cancel);
        tokio::spawn(runner.run());
    }

    fn apply_ceiling_hint(&mut self, options: &JobOptions) {
        if let Some(hint) = options.concurrency_hint() {
            self.controller.set_ceiling(hint);
        }
    }

    async fn close_contexts(&self, handles: Vec<ContextHandle>) {
        if handles.is_empty() {
            return;
        }
        let contexts = &self.backends.contexts;
        let closes = handles.iter().map(|handle| contexts.close(handle));
        for (handle, result) in handles.iter().zip(join_all(closes).await) {
            if let Err(e) = result {
                warn!("Failed to close page context {}: {}", handle, e);
            }
        }
    }

    /// Drop archive blobs referenced by results that no longer exist.
    fn release_archives(&self, records: &[JobRecord]) {
        let keys: Vec<String> = records
            .iter()
            .filter_map(|r| r.payload.as_ref()?.storage_key().map(String::from))
            .collect();
        if keys.is_empty() {
            return;
        }
        debug!(count = keys.len(), "Releasing stored archives");
        if let Err(e) = self.store.remove(&keys) {
            warn!("Failed to release stored archives: {}", e);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.queue.snapshot(self.paused).save(self.store.as_ref()) {
            error!("Failed to persist orchestrator state: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        info!(
            active = self.queue.active_len(),
            pending = self.queue.pending_len(),
            "Orchestrator shutting down"
        );
        self.persist();
        let handles = self.queue.cancel_all();
        self.close_contexts(handles).await;
    }
}
