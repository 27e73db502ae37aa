//! Mock page context provider for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{ContextError, ContextHandle, ContextProvider};

/// Mock implementation of the ContextProvider trait.
///
/// Contexts are tracked in memory so tests can assert that every opened
/// context was eventually closed.
#[derive(Debug, Default)]
pub struct MockContextProvider {
    /// Currently open contexts and their targets.
    open: Arc<RwLock<HashMap<ContextHandle, String>>>,
    /// Targets in the order their contexts were opened.
    opened: Arc<RwLock<Vec<String>>>,
    /// Handles in the order they were closed.
    closed: Arc<RwLock<Vec<ContextHandle>>>,
    /// Targets whose contexts fail to open.
    open_failures: Arc<RwLock<HashMap<String, ContextError>>>,
    /// Page titles by target.
    titles: Arc<RwLock<HashMap<String, String>>>,
    /// Simulated load duration.
    load_delay: Arc<RwLock<Duration>>,
    open_delay: Arc<RwLock<Duration>>,
    close_delay: Arc<RwLock<Duration>>,
    next_id: AtomicU64,
}

impl MockContextProvider {
    /// Create a new mock context provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opening a context for the target fail.
    pub async fn fail_open(&self, target: &str, error: ContextError) {
        self.open_failures
            .write()
            .await
            .insert(target.to_string(), error);
    }

    /// Set the page title reported for a target.
    pub async fn set_title(&self, target: &str, title: &str) {
        self.titles
            .write()
            .await
            .insert(target.to_string(), title.to_string());
    }

    /// Set the simulated load duration.
    pub async fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.write().await = delay;
    }

    /// Delay every open, before the context exists.
    pub async fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.write().await = delay;
    }

    /// Delay every close, after the context is gone.
    pub async fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.write().await = delay;
    }

    /// Targets of every context ever opened.
    pub async fn opened(&self) -> Vec<String> {
        self.opened.read().await.clone()
    }

    /// Number of contexts currently open.
    pub async fn open_count(&self) -> usize {
        self.open.read().await.len()
    }

    /// Handles closed so far, including repeated closes.
    pub async fn closed(&self) -> Vec<ContextHandle> {
        self.closed.read().await.clone()
    }
}

#[async_trait]
impl ContextProvider for MockContextProvider {
    async fn open(&self, target: &str) -> Result<ContextHandle, ContextError> {
        if let Some(err) = self.open_failures.read().await.get(target) {
            return Err(err.clone());
        }
        let delay = *self.open_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ContextHandle::new(format!("ctx-{}", id));
        self.open
            .write()
            .await
            .insert(handle.clone(), target.to_string());
        self.opened.write().await.push(target.to_string());
        Ok(handle)
    }

    async fn await_loaded(
        &self,
        handle: &ContextHandle,
        deadline: Duration,
    ) -> Result<(), ContextError> {
        if !self.open.read().await.contains_key(handle) {
            return Err(ContextError::NotFound(handle.to_string()));
        }
        let delay = *self.load_delay.read().await;
        if delay > deadline {
            tokio::time::sleep(deadline).await;
            return Err(ContextError::LoadTimeout);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn page_title(&self, handle: &ContextHandle) -> Option<String> {
        let target = self.open.read().await.get(handle).cloned()?;
        self.titles.read().await.get(&target).cloned()
    }

    async fn close(&self, handle: &ContextHandle) -> Result<(), ContextError> {
        self.open.write().await.remove(handle);
        self.closed.write().await.push(handle.clone());
        let delay = *self.close_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
