//! Request and response types exchanged with the external collaborators.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::{ExtractedImage, JobKind, JobOptions};

/// Opaque handle to an isolated page execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextHandle(String);

impl ContextHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One extraction attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest {
    /// Shared by every attempt of one job run; progress reports may use it.
    pub request_id: String,
    pub target: String,
    pub kind: JobKind,
    /// Label known before extraction.
    pub label: String,
    pub options: JobOptions,
    #[serde(with = "millis")]
    pub timeout: Duration,
}

/// Output of a successful extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractOutput {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub images: Vec<ExtractedImage>,
    /// Base64 archive, present when small enough to return inline.
    #[serde(default)]
    pub archive_inline: Option<String>,
    /// Persistent store key of an archive too large to return inline.
    #[serde(default)]
    pub archive_ref: Option<String>,
    #[serde(default)]
    pub archive_size: Option<u64>,
}

impl ExtractOutput {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

/// Output of the render backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedDocument {
    /// Base64-encoded document bytes.
    pub data: String,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
