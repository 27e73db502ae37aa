//! Job and result records shared by the queue, runner and store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options key carrying the operator's requested concurrency ceiling.
pub const CONCURRENCY_HINT_KEY: &str = "batchConcurrency";

/// Options key selecting how images are delivered by the extraction backend.
pub const IMAGE_MODE_KEY: &str = "imageMode";

/// Options key naming the output format the backend should produce.
pub const FORMAT_KEY: &str = "format";

/// Placeholder label used when the caller did not provide a title.
pub const PLACEHOLDER_LABEL: &str = "Untitled";

/// How a job's extracted output is turned into a stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Plain text/markup plus optional side images.
    #[default]
    Content,
    /// Markup forwarded to the render backend to produce a paginated document.
    RenderedDocument,
    /// Bundled archive, either inline or stored by reference.
    PackagedArchive,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Content => "content",
            JobKind::RenderedDocument => "rendered_document",
            JobKind::PackagedArchive => "packaged_archive",
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether this status ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// Opaque option bag forwarded verbatim to the extraction backend.
///
/// The orchestrator only ever reads the concurrency hint and the image mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOptions(Map<String, Value>);

impl JobOptions {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a key, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Requested concurrency ceiling, if present and numeric.
    ///
    /// Accepts numbers and numeric strings; the value is rounded.
    pub fn concurrency_hint(&self) -> Option<i64> {
        let raw = self.0.get(CONCURRENCY_HINT_KEY)?;
        let n = match raw {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then(|| n.round() as i64)
    }

    /// Whether images are bundled into a local archive, which takes longer.
    pub fn local_archive(&self) -> bool {
        self.0.get(IMAGE_MODE_KEY).and_then(Value::as_str) == Some("local")
    }

    /// Whether the backend returns HTML rather than markdown.
    pub fn html_output(&self) -> bool {
        self.0.get(FORMAT_KEY).and_then(Value::as_str) == Some("html")
    }
}

impl From<Map<String, Value>> for JobOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Advisory progress reported by the extraction backend while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub round: u64,
    pub added: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// Fresh progress for a job that was just claimed.
    pub fn starting(kind: JobKind) -> Self {
        let message = match kind {
            JobKind::PackagedArchive => "Preparing archive extraction...",
            _ => "Preparing content extraction...",
        };
        Self {
            message: Some(message.to_string()),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Merge an update, ignoring invalid or empty fields.
    pub fn apply(&mut self, update: &ProgressUpdate) {
        if let Some(total) = valid_count(update.total) {
            self.total = total;
        }
        if let Some(round) = valid_count(update.round) {
            self.round = round;
        }
        if let Some(added) = valid_count(update.added) {
            self.added = added;
        }
        if let Some(max_rounds) = update.max_rounds.filter(|n| n.is_finite() && *n > 0.0) {
            self.max_rounds = Some(max_rounds as u64);
        }
        if let Some(message) = update.message.as_deref().filter(|m| !m.is_empty()) {
            self.message = Some(message.to_string());
        }
    }
}

fn valid_count(value: Option<f64>) -> Option<u64> {
    value.filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64)
}

/// A progress report for a running job.
///
/// The job is identified either by its target or by the extraction request id
/// handed to the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub round: Option<f64>,
    #[serde(default)]
    pub added: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub max_rounds: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    /// Final report for this extraction; forces an immediate persist.
    #[serde(default)]
    pub done: bool,
}

/// One unit of work, keyed by target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub target: String,
    pub label: String,
    #[serde(default)]
    pub kind: JobKind,
    #[serde(default)]
    pub options: JobOptions,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        target: impl Into<String>,
        label: Option<String>,
        kind: JobKind,
        options: JobOptions,
    ) -> Self {
        let label = label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_LABEL.to_string());
        Self {
            target: target.into(),
            label,
            kind,
            options,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            progress: None,
        }
    }

    /// A fresh pending job for the same work, used by retry.
    pub fn requeued(record: &JobRecord) -> Self {
        Self::new(
            record.target.clone(),
            Some(record.label.clone()),
            record.kind,
            record.options.clone(),
        )
    }
}

/// An image extracted alongside page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Base64 payload; absent when the image is referenced by URL only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Heavy output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Content {
        content: String,
        #[serde(default)]
        images: Vec<ExtractedImage>,
    },
    Document {
        /// Base64-encoded rendered artifact.
        data: String,
        name: String,
    },
    Archive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inline: Option<String>,
        /// Key of the archive blob in the persistent store.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_key: Option<String>,
        name: String,
    },
}

impl JobPayload {
    /// Storage key of an archive held outside the result list.
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            JobPayload::Archive { storage_key, .. } => storage_key.as_deref(),
            _ => None,
        }
    }
}

/// A completed job, successful or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub target: String,
    pub label: String,
    #[serde(default)]
    pub kind: JobKind,
    /// Kept so that a failed job can be retried with its original options.
    #[serde(default)]
    pub options: JobOptions,
    pub status: JobStatus,
    #[serde(default)]
    pub result_size: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JobPayload>,
}

impl JobRecord {
    pub fn success(job: &Job, label: String, result_size: u64, payload: JobPayload) -> Self {
        Self {
            target: job.target.clone(),
            label,
            kind: job.kind,
            options: job.options.clone(),
            status: JobStatus::Success,
            result_size,
            timestamp: Utc::now(),
            error: None,
            payload: Some(payload),
        }
    }

    pub fn failure(job: &Job, error: impl Into<String>) -> Self {
        Self {
            target: job.target.clone(),
            label: job.label.clone(),
            kind: job.kind,
            options: job.options.clone(),
            status: JobStatus::Failed,
            result_size: 0,
            timestamp: Utc::now(),
            error: Some(error.into()),
            payload: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Recompute the size from the payload, for records persisted without one.
    pub fn estimated_size(&self) -> u64 {
        match &self.payload {
            Some(JobPayload::Content { content, images }) => content_size(content, images),
            Some(JobPayload::Document { data, .. }) => base64_decoded_len(data),
            Some(JobPayload::Archive { inline, .. }) => {
                inline.as_deref().map(base64_decoded_len).unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Size-only projection for status polling.
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            target: self.target.clone(),
            label: self.label.clone(),
            kind: self.kind,
            status: self.status,
            result_size: self.result_size,
            timestamp: self.timestamp,
            error: self.error.clone(),
        }
    }
}

/// Lightweight view of a result, without payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub target: String,
    pub label: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub result_size: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Approximate decoded size of a base64 string.
pub fn base64_decoded_len(encoded: &str) -> u64 {
    (encoded.len() as f64 * 0.75).round() as u64
}

/// Content length plus the estimated payload of embedded images.
pub fn content_size(content: &str, images: &[ExtractedImage]) -> u64 {
    let images: f64 = images
        .iter()
        .filter_map(|img| img.base64.as_deref())
        .map(|b| b.len() as f64 * 0.75)
        .sum();
    (content.len() as f64 + images).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_defaults_placeholder_label() {
        let job = Job::new("https://a.example/doc", None, JobKind::Content, JobOptions::new());
        assert_eq!(job.label, PLACEHOLDER_LABEL);
        assert_eq!(job.status, JobStatus::Pending);

        let job = Job::new("https://a.example/doc", Some("  ".into()), JobKind::Content, JobOptions::new());
        assert_eq!(job.label, PLACEHOLDER_LABEL);
    }

    #[test]
    fn test_concurrency_hint_parsing() {
        assert_eq!(JobOptions::new().concurrency_hint(), None);
        assert_eq!(
            JobOptions::new().with(CONCURRENCY_HINT_KEY, 2).concurrency_hint(),
            Some(2)
        );
        assert_eq!(
            JobOptions::new().with(CONCURRENCY_HINT_KEY, "2.6").concurrency_hint(),
            Some(3)
        );
        assert_eq!(
            JobOptions::new().with(CONCURRENCY_HINT_KEY, "lots").concurrency_hint(),
            None
        );
        assert_eq!(
            JobOptions::new().with(CONCURRENCY_HINT_KEY, json!(null)).concurrency_hint(),
            None
        );
    }

    #[test]
    fn test_local_archive_flag() {
        assert!(JobOptions::new().with(IMAGE_MODE_KEY, "local").local_archive());
        assert!(!JobOptions::new().with(IMAGE_MODE_KEY, "base64").local_archive());
        assert!(!JobOptions::new().local_archive());
    }

    #[test]
    fn test_options_serialize_transparently() {
        let options = JobOptions::new().with("format", "markdown");
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value, json!({ "format": "markdown" }));
    }

    #[test]
    fn test_progress_apply_ignores_invalid_fields() {
        let mut progress = JobProgress::default();
        progress.apply(&ProgressUpdate {
            round: Some(3.0),
            added: Some(-1.0),
            total: Some(f64::NAN),
            max_rounds: Some(0.0),
            message: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(progress.round, 3);
        assert_eq!(progress.added, 0);
        assert_eq!(progress.total, 0);
        assert_eq!(progress.max_rounds, None);
        assert_eq!(progress.message, None);

        progress.apply(&ProgressUpdate {
            added: Some(12.0),
            max_rounds: Some(40.0),
            message: Some("scrolling".into()),
            ..Default::default()
        });
        assert_eq!(progress.added, 12);
        assert_eq!(progress.max_rounds, Some(40));
        assert_eq!(progress.message.as_deref(), Some("scrolling"));
    }

    #[test]
    fn test_content_size_counts_image_payloads() {
        let images = vec![
            ExtractedImage {
                name: Some("a.png".into()),
                mime: None,
                base64: Some("A".repeat(400)),
                url: None,
            },
            ExtractedImage {
                name: None,
                mime: None,
                base64: None,
                url: Some("https://a.example/b.png".into()),
            },
        ];
        assert_eq!(content_size("hello", &images), 305);
    }

    #[test]
    fn test_record_estimated_size_by_payload() {
        let job = Job::new("t", None, JobKind::RenderedDocument, JobOptions::new());
        let record = JobRecord::success(
            &job,
            "Doc".into(),
            0,
            JobPayload::Document {
                data: "A".repeat(100),
                name: "Doc.pdf".into(),
            },
        );
        assert_eq!(record.estimated_size(), 75);

        let failed = JobRecord::failure(&job, "boom");
        assert_eq!(failed.estimated_size(), 0);
        assert!(failed.is_failed());
    }

    #[test]
    fn test_summary_drops_payload() {
        let job = Job::new("t", Some("Title".into()), JobKind::Content, JobOptions::new());
        let record = JobRecord::success(
            &job,
            "Title".into(),
            5,
            JobPayload::Content {
                content: "hello".into(),
                images: vec![],
            },
        );
        let value = serde_json::to_value(record.summary()).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["result_size"], 5);
        assert_eq!(value["status"], "success");
    }
}
