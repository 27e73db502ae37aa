//! Mock extraction backend for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{
    ContextHandle, ExtractError, ExtractErrorKind, ExtractOutput, ExtractRequest,
    ExtractionBackend,
};

/// A recorded extraction call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedExtraction {
    /// Context the extraction ran in.
    pub context: ContextHandle,
    /// The request that was sent.
    pub request: ExtractRequest,
}

/// Mock implementation of the ExtractionBackend trait.
///
/// Provides controllable behavior for testing:
/// - Per-target responses, used whenever no scripted result is queued
/// - Scripted result sequences (e.g. fail twice, then succeed)
/// - Per-target and default delays, to keep jobs running
/// - Call recording
///
/// Targets without a configured response get markdown content with a heading
/// named after the target.
///
/// # Example
///
/// ```rust,ignore
/// use quarry_core::testing::MockExtractionBackend;
///
/// let extractor = MockExtractionBackend::new();
/// extractor.fail_times("https://a.example/1", ExtractErrorKind::Timeout, 2).await;
/// extractor.respond("https://a.example/1", ExtractOutput::content("# Hello")).await;
/// ```
#[derive(Debug, Default)]
pub struct MockExtractionBackend {
    /// Results returned before falling back to the per-target response.
    scripted: Arc<RwLock<HashMap<String, VecDeque<Result<ExtractOutput, ExtractError>>>>>,
    /// Response used once the scripted results are exhausted.
    responses: Arc<RwLock<HashMap<String, ExtractOutput>>>,
    /// Delay applied to every call for a target.
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Delay applied to the next call for a target only.
    first_delays: Arc<RwLock<HashMap<String, Duration>>>,
    /// Delay for targets without their own.
    default_delay: Arc<RwLock<Duration>>,
    /// Recorded calls.
    calls: Arc<RwLock<Vec<RecordedExtraction>>>,
}

impl MockExtractionBackend {
    /// Create a new mock extraction backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response for a target.
    pub async fn respond(&self, target: &str, output: ExtractOutput) {
        self.responses
            .write()
            .await
            .insert(target.to_string(), output);
    }

    /// Queue `times` failures of the given kind for a target.
    pub async fn fail_times(&self, target: &str, kind: ExtractErrorKind, times: usize) {
        let mut scripted = self.scripted.write().await;
        let queue = scripted.entry(target.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Err(ExtractError::new(
                kind,
                format!("mock {} failure", kind.as_str()),
            )));
        }
    }

    /// Queue one specific result for a target.
    pub async fn push_result(&self, target: &str, result: Result<ExtractOutput, ExtractError>) {
        self.scripted
            .write()
            .await
            .entry(target.to_string())
            .or_default()
            .push_back(result);
    }

    /// Delay every call for a target.
    pub async fn set_delay(&self, target: &str, delay: Duration) {
        self.delays.write().await.insert(target.to_string(), delay);
    }

    /// Delay only the next call for a target.
    pub async fn delay_first(&self, target: &str, delay: Duration) {
        self.first_delays
            .write()
            .await
            .insert(target.to_string(), delay);
    }

    /// Delay calls for targets without their own delay.
    pub async fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.write().await = delay;
    }

    /// Get all recorded calls.
    pub async fn recorded_extractions(&self) -> Vec<RecordedExtraction> {
        self.calls.read().await.clone()
    }

    /// Number of calls made for a target.
    pub async fn calls_for(&self, target: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.request.target == target)
            .count()
    }

    /// Total number of calls.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// The most recent request for a target.
    pub async fn last_request(&self, target: &str) -> Option<ExtractRequest> {
        self.calls
            .read()
            .await
            .iter()
            .rev()
            .find(|c| c.request.target == target)
            .map(|c| c.request.clone())
    }

    async fn delay_for(&self, target: &str) -> Duration {
        if let Some(delay) = self.first_delays.write().await.remove(target) {
            return delay;
        }
        if let Some(delay) = self.delays.read().await.get(target) {
            return *delay;
        }
        *self.default_delay.read().await
    }
}

#[async_trait]
impl ExtractionBackend for MockExtractionBackend {
    async fn extract(
        &self,
        context: &ContextHandle,
        request: &ExtractRequest,
    ) -> Result<ExtractOutput, ExtractError> {
        self.calls.write().await.push(RecordedExtraction {
            context: context.clone(),
            request: request.clone(),
        });

        let delay = self.delay_for(&request.target).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .write()
            .await
            .get_mut(&request.target)
            .and_then(|queue| queue.pop_front());
        if let Some(result) = scripted {
            return result;
        }

        match self.responses.read().await.get(&request.target) {
            Some(output) => Ok(output.clone()),
            None => Ok(ExtractOutput::content(format!(
                "# {}\n\nExtracted content",
                request.target
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobOptions};

    fn request(target: &str) -> ExtractRequest {
        ExtractRequest {
            request_id: "batch-1".to_string(),
            target: target.to_string(),
            kind: JobKind::Content,
            label: "Untitled".to_string(),
            options: JobOptions::new(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_scripted_results_come_first() {
        let mock = MockExtractionBackend::new();
        mock.fail_times("t", ExtractErrorKind::Timeout, 1).await;
        mock.respond("t", ExtractOutput::content("ok")).await;
        let ctx = ContextHandle::new("ctx-1");

        let first = mock.extract(&ctx, &request("t")).await.unwrap_err();
        assert_eq!(first.kind, ExtractErrorKind::Timeout);
        let second = mock.extract(&ctx, &request("t")).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("ok"));
        assert_eq!(mock.calls_for("t").await, 2);
    }

    #[tokio::test]
    async fn test_default_output_names_target() {
        let mock = MockExtractionBackend::new();
        let output = mock
            .extract(&ContextHandle::new("ctx-1"), &request("https://a.example/x"))
            .await
            .unwrap();
        assert!(output
            .content
            .unwrap()
            .starts_with("# https://a.example/x"));
    }
}
