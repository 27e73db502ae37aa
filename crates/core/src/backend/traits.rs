//! Traits for the collaborators the orchestrator drives but does not own.

use std::time::Duration;

use async_trait::async_trait;

use super::{
    ContextError, ContextHandle, ExtractError, ExtractOutput, ExtractRequest, RenderError,
    RenderedDocument,
};

/// Opens and tears down isolated page execution contexts.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Open a context loading the given target.
    async fn open(&self, target: &str) -> Result<ContextHandle, ContextError>;

    /// Wait until the context finished loading, or the deadline passed.
    async fn await_loaded(
        &self,
        handle: &ContextHandle,
        deadline: Duration,
    ) -> Result<(), ContextError>;

    /// Current page title of the context, if known.
    async fn page_title(&self, handle: &ContextHandle) -> Option<String>;

    /// Tear down a context. Closing an already closed context is not an error.
    async fn close(&self, handle: &ContextHandle) -> Result<(), ContextError>;
}

/// Runs the page-specific extraction inside an open context.
///
/// Implementations must tolerate being re-invoked after a timed out attempt.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(
        &self,
        context: &ContextHandle,
        request: &ExtractRequest,
    ) -> Result<ExtractOutput, ExtractError>;
}

/// Renders markup into a paginated document.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, markup: &str, title: &str) -> Result<RenderedDocument, RenderError>;
}
