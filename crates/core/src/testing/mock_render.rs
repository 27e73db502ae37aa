//! Mock render backend for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{RenderBackend, RenderError, RenderedDocument};

/// A recorded render call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRender {
    pub markup: String,
    pub title: String,
}

/// Mock implementation of the RenderBackend trait.
#[derive(Debug, Default)]
pub struct MockRenderBackend {
    renders: Arc<RwLock<Vec<RecordedRender>>>,
    /// If set, every render fails with this error.
    error: Arc<RwLock<Option<RenderError>>>,
}

impl MockRenderBackend {
    /// Create a new mock render backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every render fail.
    pub async fn fail_with(&self, error: RenderError) {
        *self.error.write().await = Some(error);
    }

    pub async fn clear_error(&self) {
        *self.error.write().await = None;
    }

    pub async fn recorded_renders(&self) -> Vec<RecordedRender> {
        self.renders.read().await.clone()
    }

    /// Titles of all renders, in call order.
    pub async fn rendered_titles(&self) -> Vec<String> {
        self.renders
            .read()
            .await
            .iter()
            .map(|r| r.title.clone())
            .collect()
    }
}

#[async_trait]
impl RenderBackend for MockRenderBackend {
    async fn render(&self, markup: &str, title: &str) -> Result<RenderedDocument, RenderError> {
        self.renders.write().await.push(RecordedRender {
            markup: markup.to_string(),
            title: title.to_string(),
        });
        if let Some(err) = self.error.read().await.clone() {
            return Err(err);
        }
        // "%PDF-1.4\n" in base64, padded to a size proportional to the input.
        Ok(RenderedDocument {
            data: format!("JVBERi0xLjQK{}", "A".repeat(markup.len())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_renders_in_order() {
        let renderer = MockRenderBackend::new();
        tokio_test::block_on(async {
            renderer.render("<p>one</p>", "One").await.unwrap();
            renderer.render("<p>two</p>", "Two").await.unwrap();
            assert_eq!(renderer.rendered_titles().await, vec!["One", "Two"]);
        });
    }

    #[test]
    fn test_fail_with_until_cleared() {
        let renderer = MockRenderBackend::new();
        tokio_test::block_on(async {
            renderer
                .fail_with(RenderError::Unavailable("no browser".into()))
                .await;
            assert!(renderer.render("<p>x</p>", "x").await.is_err());

            renderer.clear_error().await;
            let doc = renderer.render("<p>x</p>", "x").await.unwrap();
            assert!(doc.data.starts_with("JVBERi0"));
            assert_eq!(renderer.recorded_renders().await.len(), 2);
        });
    }
}
