//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by a real orchestrator with mock page backends injected, enabling
//! API testing without a page agent.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use quarry_core::{
    create_orchestrator,
    testing::{MockContextProvider, MockExtractionBackend, MockRenderBackend},
    BatchConfig, Config, DatabaseConfig, OrchestratorHandle, PageBackends, SqliteStateStore,
    StateStore,
};

/// Re-export fixtures for test convenience
pub use quarry_core::testing::fixtures;

/// Test fixture for API testing with mock page backends.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_enqueue() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/batch/jobs", json!({
///         "items": [{ "target": "https://docs.example/a" }]
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Handle to the orchestrator behind the router
    pub orchestrator: OrchestratorHandle,
    /// State store shared with the orchestrator
    pub store: Arc<SqliteStateStore>,
    /// Mock context provider
    pub contexts: Arc<MockContextProvider>,
    /// Mock extraction backend - configure responses and delays
    pub extractor: Arc<MockExtractionBackend>,
    /// Mock render backend
    pub renderer: Arc<MockRenderBackend>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with fast batch settings.
    pub async fn new() -> Self {
        Self::with_batch_config(BatchConfig {
            extract_timeout_ms: 30_000,
            ..fixtures::fast_batch_config()
        })
        .await
    }

    /// Create a test fixture with custom batch settings.
    pub async fn with_batch_config(batch: BatchConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let contexts = Arc::new(MockContextProvider::new());
        let extractor = Arc::new(MockExtractionBackend::new());
        let renderer = Arc::new(MockRenderBackend::new());

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            batch: batch.clone(),
            ..Default::default()
        };

        let store = Arc::new(SqliteStateStore::new(&db_path).expect("Failed to create store"));
        let backends = PageBackends::new(
            Arc::clone(&contexts) as _,
            Arc::clone(&extractor) as _,
            Arc::clone(&renderer) as _,
        );
        let (orchestrator, orchestrator_loop) =
            create_orchestrator(batch, Arc::clone(&store) as Arc<dyn StateStore>, backends)
                .expect("Failed to create orchestrator");
        tokio::spawn(orchestrator_loop.run());

        let state = Arc::new(quarry_server::state::AppState::new(
            config,
            orchestrator.clone(),
        ));
        let router = quarry_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            store,
            contexts,
            extractor,
            renderer,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a POST request with a raw, possibly malformed, JSON body.
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        self.send(request).await
    }

    /// Fetch the raw text of a response (for non-JSON endpoints).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll the status endpoint until the predicate holds.
    pub async fn wait_for_status(&self, predicate: impl Fn(&Value) -> bool) -> Value {
        let start = std::time::Instant::now();
        loop {
            let response = self.get("/api/v1/batch/status").await;
            if predicate(&response.body) {
                return response.body;
            }
            if start.elapsed() > Duration::from_secs(5) {
                panic!("Timed out waiting for status: {}", response.body);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until nothing is pending or running.
    pub async fn wait_idle(&self) -> Value {
        self.wait_for_status(|body| body["busy"] == Value::Bool(false))
            .await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
