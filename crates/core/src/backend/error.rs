//! Errors returned by the external collaborators.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of extraction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractErrorKind {
    /// The attempt did not finish within its timeout.
    Timeout,
    /// Generic failure reported by the backend.
    Failed,
    /// The bundled archive exceeded the backend's size limit.
    ArchiveTooLarge,
    /// Packaging or encoding the archive timed out.
    ArchiveTimeout,
    /// The attempt was abandoned because the job was cancelled.
    Cancelled,
}

impl ExtractErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractErrorKind::Timeout => "timeout",
            ExtractErrorKind::Failed => "failed",
            ExtractErrorKind::ArchiveTooLarge => "archive_too_large",
            ExtractErrorKind::ArchiveTimeout => "archive_timeout",
            ExtractErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether another attempt can possibly succeed.
    ///
    /// Archive failures depend on content size, which a retry cannot change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractErrorKind::Timeout | ExtractErrorKind::Failed)
    }
}

/// Error from one extraction attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExtractError {
    pub kind: ExtractErrorKind,
    pub message: String,
}

impl ExtractError {
    pub fn new(kind: ExtractErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::Failed, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ExtractErrorKind::Timeout,
            format!("Extraction timeout after {}s", after.as_secs_f64().round() as u64),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ExtractErrorKind::Cancelled, "Cancelled")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors from the execution context provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Failed to open page context: {0}")]
    OpenFailed(String),

    #[error("Page context not found: {0}")]
    NotFound(String),

    #[error("Page context did not finish loading in time")]
    LoadTimeout,

    #[error("Page context error: {0}")]
    Other(String),
}

/// Errors from the render backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Render backend unavailable: {0}")]
    Unavailable(String),

    #[error("Render failed: {0}")]
    Failed(String),
}
