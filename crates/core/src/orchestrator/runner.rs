//! Execution of a single job.
//!
//! A runner is spawned by the orchestrator loop for every claimed job. It owns
//! nothing shared: it talks to the collaborators through [`PageBackends`] and
//! reports back to the loop through [`RunnerEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ContextHandle, ExtractError, ExtractOutput, ExtractRequest, PageBackends};
use crate::job::{
    base64_decoded_len, content_size, leading_heading, normalize_title, sanitize_filename, Job,
    JobKind, JobPayload, JobRecord, PLACEHOLDER_LABEL,
};
use crate::metrics::{EXTRACT_ATTEMPTS, JOBS_FINISHED, JOB_DURATION};
use crate::store::StateStore;

use super::config::BatchConfig;
use super::types::JobError;

/// Messages from runners (and timers) back to the orchestrator loop.
#[derive(Debug)]
pub(crate) enum RunnerEvent {
    /// A page context was opened for the target.
    ContextOpened {
        target: String,
        handle: ContextHandle,
    },
    /// The runner is done and has released its context.
    Finished {
        target: String,
        result: Result<JobRecord, JobError>,
    },
    /// A freed slot may be refilled.
    Backfill,
}

pub(crate) struct JobRunner {
    job: Job,
    request_id: String,
    config: BatchConfig,
    backends: PageBackends,
    /// Holds archives the extraction backend stored by reference.
    store: Arc<dyn StateStore>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl JobRunner {
    pub(crate) fn new(
        job: Job,
        request_id: String,
        config: BatchConfig,
        backends: PageBackends,
        store: Arc<dyn StateStore>,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) -> Self {
        Self {
            job,
            request_id,
            config,
            backends,
            store,
            cancel,
            events,
        }
    }

    /// Run the job to completion and report the outcome.
    pub(crate) async fn run(self) {
        let started = Instant::now();
        let mut context = None;

        let result = self.execute(&mut context).await;

        if let Some(handle) = context {
            if let Err(e) = self.backends.contexts.close(&handle).await {
                warn!(job = %self.job.target, "Failed to close page context {}: {}", handle, e);
            }
        }

        let outcome = match &result {
            _ if self.cancel.is_cancelled() => "cancelled",
            Err(JobError::Cancelled) => "cancelled",
            Ok(_) => "success",
            Err(_) => "failed",
        };
        JOBS_FINISHED.with_label_values(&[outcome]).inc();
        JOB_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(record) => info!(
                job = %self.job.target,
                size = record.result_size,
                "Job succeeded: {}",
                record.label
            ),
            Err(JobError::Cancelled) => info!(job = %self.job.target, "Job cancelled"),
            Err(e) => warn!(job = %self.job.target, "Job failed: {}", e),
        }

        let _ = self.events.send(RunnerEvent::Finished {
            target: self.job.target.clone(),
            result,
        });
    }

    async fn execute(&self, context: &mut Option<ContextHandle>) -> Result<JobRecord, JobError> {
        self.checkpoint("start")?;

        let handle = tokio::select! {
            _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
            opened = self.backends.contexts.open(&self.job.target) => opened?,
        };
        *context = Some(handle.clone());
        let _ = self.events.send(RunnerEvent::ContextOpened {
            target: self.job.target.clone(),
            handle: handle.clone(),
        });
        self.checkpoint("context opened")?;

        self.wait_for_load(&handle).await?;
        self.checkpoint("loaded")?;

        self.sleep_or_cancel(self.config.settle_delay()).await?;
        self.checkpoint("settled")?;

        let output = self.extract_with_retry(&handle).await?;
        if let Err(e) = self.checkpoint("extracted") {
            self.release_stored_archive(&output);
            return Err(e);
        }

        let label = self.refine_label(&handle, &output).await;
        self.build_record(label, output).await
    }

    fn checkpoint(&self, stage: &str) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            debug!(job = %self.job.target, stage, "Cancellation observed");
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Drop an archive the backend stored for an outcome that will never be
    /// recorded.
    fn release_stored_archive(&self, output: &ExtractOutput) {
        let Some(key) = &output.archive_ref else {
            return;
        };
        debug!(job = %self.job.target, key = %key, "Releasing archive of cancelled job");
        if let Err(e) = self.store.remove(std::slice::from_ref(key)) {
            warn!(job = %self.job.target, "Failed to release stored archive {}: {}", key, e);
        }
    }

    /// A load that misses its deadline is not fatal; extraction decides.
    async fn wait_for_load(&self, handle: &ContextHandle) -> Result<(), JobError> {
        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
            loaded = self.backends.contexts.await_loaded(handle, self.config.load_timeout()) => loaded,
        };
        if let Err(e) = loaded {
            warn!(job = %self.job.target, "Page context load wait failed, continuing: {}", e);
        }
        Ok(())
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> Result<(), JobError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(JobError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn extract_with_retry(&self, handle: &ContextHandle) -> Result<ExtractOutput, JobError> {
        let timeout = self.config.extract_timeout(self.job.options.local_archive());
        let max_attempts = self.config.max_attempts.max(1);
        let request = ExtractRequest {
            request_id: self.request_id.clone(),
            target: self.job.target.clone(),
            kind: self.job.kind,
            label: self.job.label.clone(),
            options: self.job.options.clone(),
            timeout,
        };

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            self.checkpoint("extract attempt")?;
            debug!(job = %self.job.target, attempt, max_attempts, "Extraction attempt");

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
                result = tokio::time::timeout(timeout, self.backends.extractor.extract(handle, &request)) => {
                    result.unwrap_or_else(|_| Err(ExtractError::timeout(timeout)))
                }
            };

            match result {
                Ok(output) => {
                    EXTRACT_ATTEMPTS.with_label_values(&["success"]).inc();
                    return Ok(output);
                }
                Err(e) => {
                    EXTRACT_ATTEMPTS.with_label_values(&[e.kind.as_str()]).inc();
                    warn!(
                        job = %self.job.target,
                        attempt,
                        max_attempts,
                        kind = e.kind.as_str(),
                        "Extraction attempt failed: {}",
                        e
                    );
                    let retry = e.is_retryable() && attempt < max_attempts;
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                    // Not a checkpoint; the next attempt checks on entry.
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ExtractError::failed("Extraction failed"))
            .into())
    }

    /// Pick the label for the result.
    ///
    /// A placeholder label is replaced by the leading heading of the content,
    /// then by the page title, then by a generated one.
    async fn refine_label(&self, handle: &ContextHandle, output: &ExtractOutput) -> String {
        let mut label = self.job.label.trim().to_string();

        if is_placeholder(&label) {
            let markup = self.job.kind == JobKind::RenderedDocument || self.job.options.html_output();
            if let Some(heading) = output
                .content
                .as_deref()
                .and_then(|content| leading_heading(content, markup))
            {
                label = heading;
            }
        }

        if is_placeholder(&label) {
            label = match self.backends.contexts.page_title(handle).await {
                Some(title) if !title.trim().is_empty() => title.trim().to_string(),
                _ => format!("Doc {}", Utc::now().timestamp_millis()),
            };
        }

        let normalized = normalize_title(&label);
        if normalized.is_empty() {
            label
        } else {
            normalized
        }
    }

    async fn build_record(&self, label: String, output: ExtractOutput) -> Result<JobRecord, JobError> {
        match self.job.kind {
            JobKind::Content => {
                let content = output.content.unwrap_or_default();
                let size = content_size(&content, &output.images);
                let payload = JobPayload::Content {
                    content,
                    images: output.images,
                };
                Ok(JobRecord::success(&self.job, label, size, payload))
            }
            JobKind::RenderedDocument => {
                let markup = output.content.unwrap_or_default();
                let rendered = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(JobError::Cancelled),
                    rendered = self.backends.renderer.render(&markup, &label) => rendered?,
                };
                let size = base64_decoded_len(&rendered.data);
                let payload = JobPayload::Document {
                    data: rendered.data,
                    name: format!("{}.pdf", sanitize_filename(&label)),
                };
                Ok(JobRecord::success(&self.job, label, size, payload))
            }
            JobKind::PackagedArchive => {
                if output.archive_inline.is_none() && output.archive_ref.is_none() {
                    return Err(JobError::MissingArchive);
                }
                let size = output.archive_size.unwrap_or_else(|| {
                    output
                        .archive_inline
                        .as_deref()
                        .map(base64_decoded_len)
                        .unwrap_or(0)
                });
                let payload = JobPayload::Archive {
                    inline: output.archive_inline,
                    storage_key: output.archive_ref,
                    name: format!("{}.zip", sanitize_filename(&label)),
                };
                Ok(JobRecord::success(&self.job, label, size, payload))
            }
        }
    }
}

fn is_placeholder(label: &str) -> bool {
    label.is_empty() || label == PLACEHOLDER_LABEL
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{ContextError, ExtractErrorKind, RenderError};
    use crate::job::{JobOptions, IMAGE_MODE_KEY};
    use crate::store::SqliteStateStore;
    use crate::testing::{MockContextProvider, MockExtractionBackend, MockRenderBackend};

    struct Harness {
        contexts: Arc<MockContextProvider>,
        extractor: Arc<MockExtractionBackend>,
        renderer: Arc<MockRenderBackend>,
        store: Arc<SqliteStateStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                contexts: Arc::new(MockContextProvider::new()),
                extractor: Arc::new(MockExtractionBackend::new()),
                renderer: Arc::new(MockRenderBackend::new()),
                store: Arc::new(SqliteStateStore::in_memory().unwrap()),
            }
        }

        fn backends(&self) -> PageBackends {
            PageBackends::new(
                self.contexts.clone(),
                self.extractor.clone(),
                self.renderer.clone(),
            )
        }

        async fn run(
            &self,
            job: Job,
            cancel: CancellationToken,
        ) -> Result<JobRecord, JobError> {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let runner = JobRunner::new(
                job,
                "batch-test".to_string(),
                fast_config(),
                self.backends(),
                self.store.clone(),
                cancel,
                tx,
            );
            runner.run().await;
            loop {
                match rx.recv().await {
                    Some(RunnerEvent::Finished { result, .. }) => return result,
                    Some(_) => continue,
                    None => panic!("runner exited without reporting"),
                }
            }
        }
    }

    fn fast_config() -> BatchConfig {
        BatchConfig {
            settle_delay_ms: 0,
            retry_delay_ms: 1,
            extract_timeout_ms: 200,
            extract_timeout_local_archive_ms: 400,
            ..Default::default()
        }
    }

    fn content_job(target: &str) -> Job {
        Job::new(target, None, JobKind::Content, JobOptions::new())
    }

    #[tokio::test]
    async fn test_content_job_succeeds_and_closes_context() {
        let h = Harness::new();
        h.extractor
            .respond("https://a.example/1", ExtractOutput::content("# Report\n\nbody"))
            .await;

        let record = h
            .run(content_job("https://a.example/1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.label, "Report");
        assert_eq!(record.result_size, "# Report\n\nbody".len() as u64);
        assert_eq!(h.contexts.opened().await.len(), 1);
        assert_eq!(h.contexts.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_retries_retryable_failures() {
        let h = Harness::new();
        h.extractor.fail_times("t", ExtractErrorKind::Failed, 2).await;
        h.extractor.respond("t", ExtractOutput::content("ok")).await;

        let record = h.run(content_job("t"), CancellationToken::new()).await.unwrap();
        assert_eq!(record.result_size, 2);
        assert_eq!(h.extractor.calls_for("t").await, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_budget() {
        let h = Harness::new();
        h.extractor.fail_times("t", ExtractErrorKind::Failed, 5).await;

        let err = h.run(content_job("t"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::Extraction(_)));
        assert_eq!(h.extractor.calls_for("t").await, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let h = Harness::new();
        h.extractor
            .fail_times("t", ExtractErrorKind::ArchiveTooLarge, 1)
            .await;
        h.extractor.respond("t", ExtractOutput::content("never")).await;

        let err = h.run(content_job("t"), CancellationToken::new()).await.unwrap_err();
        match err {
            JobError::Extraction(e) => assert_eq!(e.kind, ExtractErrorKind::ArchiveTooLarge),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.extractor.calls_for("t").await, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        let h = Harness::new();
        h.extractor.delay_first("t", Duration::from_secs(5)).await;
        h.extractor.respond("t", ExtractOutput::content("late but fine")).await;

        let record = h.run(content_job("t"), CancellationToken::new()).await.unwrap();
        assert_eq!(record.status, crate::job::JobStatus::Success);
        assert_eq!(h.extractor.calls_for("t").await, 2);
    }

    #[tokio::test]
    async fn test_local_archive_uses_longer_timeout() {
        let h = Harness::new();
        h.extractor.respond(
            "t",
            ExtractOutput {
                archive_inline: Some("A".repeat(40)),
                ..Default::default()
            },
        ).await;
        let job = Job::new(
            "t",
            Some("Bundle".into()),
            JobKind::PackagedArchive,
            JobOptions::new().with(IMAGE_MODE_KEY, "local"),
        );

        let record = h.run(job, CancellationToken::new()).await.unwrap();
        let request = h.extractor.last_request("t").await.unwrap();
        assert_eq!(request.timeout, Duration::from_millis(400));
        assert_eq!(request.request_id, "batch-test");
        assert_eq!(record.result_size, 30);
        match record.payload {
            Some(JobPayload::Archive { name, inline, .. }) => {
                assert_eq!(name, "Bundle.zip");
                assert!(inline.is_some());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_archive_without_payload_fails() {
        let h = Harness::new();
        h.extractor.respond("t", ExtractOutput::default()).await;
        let job = Job::new("t", None, JobKind::PackagedArchive, JobOptions::new());

        let err = h.run(job, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::MissingArchive));
    }

    #[tokio::test]
    async fn test_rendered_document_goes_through_renderer() {
        let h = Harness::new();
        h.extractor
            .respond("t", ExtractOutput::content("<h1>Spec <b>Sheet</b></h1><p>x</p>"))
            .await;
        let job = Job::new("t", None, JobKind::RenderedDocument, JobOptions::new());

        let record = h.run(job, CancellationToken::new()).await.unwrap();
        assert_eq!(record.label, "Spec Sheet");
        assert_eq!(h.renderer.rendered_titles().await, vec!["Spec Sheet".to_string()]);
        match record.payload {
            Some(JobPayload::Document { name, .. }) => assert_eq!(name, "Spec Sheet.pdf"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_failure_fails_job() {
        let h = Harness::new();
        h.extractor.respond("t", ExtractOutput::content("<p>x</p>")).await;
        h.renderer
            .fail_with(RenderError::Failed("printer on fire".into()))
            .await;
        let job = Job::new("t", Some("Doc".into()), JobKind::RenderedDocument, JobOptions::new());

        let err = h.run(job, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::Render(_)));
        assert_eq!(h.contexts.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_context_failure_is_terminal() {
        let h = Harness::new();
        h.contexts
            .fail_open("t", ContextError::OpenFailed("no browser".into()))
            .await;

        let err = h.run(content_job("t"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::ContextAcquisition(_)));
        assert_eq!(h.extractor.calls_for("t").await, 0);
    }

    #[tokio::test]
    async fn test_page_title_fallback() {
        let h = Harness::new();
        h.contexts.set_title("t", "Quarterly numbers - Docs").await;
        h.extractor.respond("t", ExtractOutput::content("no heading here")).await;

        let record = h.run(content_job("t"), CancellationToken::new()).await.unwrap();
        assert_eq!(record.label, "Quarterly numbers");
    }

    #[tokio::test]
    async fn test_explicit_label_is_kept() {
        let h = Harness::new();
        h.extractor.respond("t", ExtractOutput::content("# Other heading")).await;
        let job = Job::new("t", Some("Chosen".into()), JobKind::Content, JobOptions::new());

        let record = h.run(job, CancellationToken::new()).await.unwrap();
        assert_eq!(record.label, "Chosen");
    }

    #[tokio::test]
    async fn test_cancel_during_extraction() {
        let h = Harness::new();
        h.extractor.delay_first("t", Duration::from_secs(30)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = h.run(content_job("t"), cancel).await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(h.contexts.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_during_open() {
        let h = Harness::new();
        h.contexts.set_open_delay(Duration::from_secs(30)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = h.run(content_job("t"), cancel).await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.extractor.calls_for("t").await, 0);
    }

    /// Cancels the job as its extraction comes back.
    struct CancellingExtractor {
        cancel: CancellationToken,
        output: ExtractOutput,
    }

    #[async_trait::async_trait]
    impl crate::backend::ExtractionBackend for CancellingExtractor {
        async fn extract(
            &self,
            _context: &ContextHandle,
            _request: &ExtractRequest,
        ) -> Result<ExtractOutput, ExtractError> {
            self.cancel.cancel();
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_cancel_after_extraction_releases_stored_archive() {
        let h = Harness::new();
        h.store
            .set(vec![(
                "archive:batch-test".to_string(),
                serde_json::json!("UEsDBA=="),
            )])
            .unwrap();
        let cancel = CancellationToken::new();
        let extractor = Arc::new(CancellingExtractor {
            cancel: cancel.clone(),
            output: ExtractOutput {
                archive_ref: Some("archive:batch-test".into()),
                archive_size: Some(10_000_000),
                ..Default::default()
            },
        });
        let backends = PageBackends::new(h.contexts.clone(), extractor, h.renderer.clone());
        let job = Job::new("t", Some("Bundle".into()), JobKind::PackagedArchive, JobOptions::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        JobRunner::new(
            job,
            "batch-test".to_string(),
            fast_config(),
            backends,
            h.store.clone(),
            cancel,
            tx,
        )
        .run()
        .await;

        let result = loop {
            match rx.recv().await {
                Some(RunnerEvent::Finished { result, .. }) => break result,
                Some(_) => continue,
                None => panic!("runner exited without reporting"),
            }
        };
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(h.store.get(&["archive:batch-test"]).unwrap().is_empty());
        assert_eq!(h.contexts.open_count().await, 0);
    }
}
