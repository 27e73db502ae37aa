//! External collaborators: page contexts, extraction and rendering.
//!
//! The orchestrator only talks to these through traits. `HttpPageAgent` in
//! [`crate::agent`] implements all three against a remote page agent, and
//! [`crate::testing`] provides scriptable mocks.

mod error;
mod traits;
mod types;

use std::sync::Arc;

pub use error::{ContextError, ExtractError, ExtractErrorKind, RenderError};
pub use traits::{ContextProvider, ExtractionBackend, RenderBackend};
pub use types::{ContextHandle, ExtractOutput, ExtractRequest, RenderedDocument};

/// The set of collaborators a job runner needs.
#[derive(Clone)]
pub struct PageBackends {
    pub contexts: Arc<dyn ContextProvider>,
    pub extractor: Arc<dyn ExtractionBackend>,
    pub renderer: Arc<dyn RenderBackend>,
}

impl PageBackends {
    pub fn new(
        contexts: Arc<dyn ContextProvider>,
        extractor: Arc<dyn ExtractionBackend>,
        renderer: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            contexts,
            extractor,
            renderer,
        }
    }
}
