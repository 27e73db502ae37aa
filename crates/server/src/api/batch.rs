//! Batch orchestrator API handlers.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use quarry_core::{
    ConcurrencySnapshot, EnqueueRequest, JobRecord, OrchestratorError, OrchestratorStatus,
    ProgressUpdate, RenderError,
};

use crate::state::AppState;

/// Title used for direct renders that do not name one.
const DEFAULT_RENDER_TITLE: &str = "document";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for fetching complete results
#[derive(Debug, Deserialize)]
pub struct FullResultsBody {
    pub targets: Vec<String>,
}

/// Request body naming one target
#[derive(Debug, Deserialize)]
pub struct TargetBody {
    pub target: String,
}

/// Request body for changing the concurrency ceiling
#[derive(Debug, Deserialize)]
pub struct ConcurrencyBody {
    /// Fractional values are rounded to the nearest whole slot.
    pub ceiling: f64,
}

/// Request body for a direct render
#[derive(Debug, Deserialize)]
pub struct RenderBody {
    pub markup: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub success: bool,
    pub added: usize,
    pub pending_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: OrchestratorStatus,
}

#[derive(Debug, Serialize)]
pub struct FullResultsResponse {
    pub success: bool,
    pub results: Vec<JobRecord>,
}

#[derive(Debug, Serialize)]
pub struct ConcurrencyResponse {
    pub success: bool,
    #[serde(flatten)]
    pub concurrency: ConcurrencySnapshot,
}

#[derive(Debug, Serialize)]
pub struct RetryAllResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub success: bool,
    /// Whether a running job matched the report.
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub success: bool,
    /// Base64-encoded document.
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub success: bool,
    pub key: String,
    /// Base64-encoded archive.
    pub data: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct BatchErrorResponse {
    pub success: bool,
    pub error: String,
}

type ErrorReply = (StatusCode, Json<BatchErrorResponse>);

fn error_reply(status: StatusCode, error: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(BatchErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
}

/// JSON body extractor whose rejections keep the `success`/`error` shape.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ErrorReply;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(
                    status = %rejection.status(),
                    "Rejected request body: {}",
                    rejection.body_text()
                );
                Err(error_reply(rejection.status(), rejection.body_text()))
            }
        }
    }
}

fn orchestrator_error(err: OrchestratorError) -> ErrorReply {
    let status = match &err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::NotFailed(_) => StatusCode::CONFLICT,
        OrchestratorError::NoItems => StatusCode::BAD_REQUEST,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OrchestratorError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_reply(status, err.to_string())
}

fn render_error(err: RenderError) -> ErrorReply {
    let status = match &err {
        RenderError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RenderError::Failed(_) => StatusCode::BAD_GATEWAY,
    };
    error_reply(status, err.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue targets for extraction
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, impl IntoResponse> {
    state
        .orchestrator()
        .enqueue(body)
        .await
        .map(|outcome| {
            Json(EnqueueResponse {
                success: true,
                added: outcome.added,
                pending_count: outcome.pending_count,
            })
        })
        .map_err(orchestrator_error)
}

/// Get queue status with size-only result summaries
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, impl IntoResponse> {
    state
        .orchestrator()
        .status()
        .await
        .map(|status| {
            Json(StatusResponse {
                success: true,
                status,
            })
        })
        .map_err(orchestrator_error)
}

/// Get complete result records, payload included
pub async fn get_full_results(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FullResultsBody>,
) -> Result<Json<FullResultsResponse>, impl IntoResponse> {
    state
        .orchestrator()
        .full_results(body.targets)
        .await
        .map(|results| {
            Json(FullResultsResponse {
                success: true,
                results,
            })
        })
        .map_err(orchestrator_error)
}

/// Pause the queue, cancelling running jobs
pub async fn pause(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    match state.orchestrator().pause().await {
        Ok(()) => Ok(MessageResponse::ok("Batch paused")),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Resume the queue
pub async fn resume(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    match state.orchestrator().resume().await {
        Ok(()) => Ok(MessageResponse::ok("Batch resumed")),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Cancel everything and drop all results
pub async fn clear_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    match state.orchestrator().clear_all().await {
        Ok(()) => Ok(MessageResponse::ok("Batch cleared")),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Set the concurrency ceiling
pub async fn set_concurrency(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<ConcurrencyBody>,
) -> Result<Json<ConcurrencyResponse>, impl IntoResponse> {
    state
        .orchestrator()
        .set_concurrency(body.ceiling.round() as i64)
        .await
        .map(|concurrency| {
            Json(ConcurrencyResponse {
                success: true,
                concurrency,
            })
        })
        .map_err(orchestrator_error)
}

/// Delete one target, cancelling it if running
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<TargetBody>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    match state.orchestrator().delete(body.target.clone()).await {
        Ok(()) => Ok(MessageResponse::ok(format!("Deleted {}", body.target))),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Retry one failed target
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<TargetBody>,
) -> Result<Json<MessageResponse>, impl IntoResponse> {
    match state.orchestrator().retry(body.target.clone()).await {
        Ok(()) => Ok(MessageResponse::ok(format!("Retrying {}", body.target))),
        Err(e) => Err(orchestrator_error(e)),
    }
}

/// Retry every failed target
pub async fn retry_all_failed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryAllResponse>, impl IntoResponse> {
    state
        .orchestrator()
        .retry_all_failed()
        .await
        .map(|count| {
            Json(RetryAllResponse {
                success: true,
                count,
            })
        })
        .map_err(orchestrator_error)
}

/// Accept a progress report from the page agent
pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<ProgressUpdate>,
) -> Result<Json<ProgressResponse>, impl IntoResponse> {
    if body.target.is_none() && body.request_id.is_none() {
        return Err(error_reply(
            StatusCode::BAD_REQUEST,
            "target or request_id is required",
        ));
    }

    state
        .orchestrator()
        .report_progress(body)
        .await
        .map(|applied| {
            Json(ProgressResponse {
                success: true,
                applied,
            })
        })
        .map_err(orchestrator_error)
}

/// Render markup outside the queue
pub async fn render(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<RenderBody>,
) -> Result<Json<RenderResponse>, impl IntoResponse> {
    if body.markup.trim().is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "markup cannot be empty"));
    }

    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_RENDER_TITLE);

    state
        .orchestrator()
        .render(&body.markup, title)
        .await
        .map(|document| {
            Json(RenderResponse {
                success: true,
                data: document.data,
            })
        })
        .map_err(|e| {
            warn!("Direct render failed: {}", e);
            render_error(e)
        })
}

/// Fetch an archive stored by reference
pub async fn get_archive(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ArchiveResponse>, impl IntoResponse> {
    match state.orchestrator().archive(&key) {
        Ok(Some(data)) => Ok(Json(ArchiveResponse {
            success: true,
            key,
            data,
        })),
        Ok(None) => Err(error_reply(
            StatusCode::NOT_FOUND,
            format!("Archive not found: {}", key),
        )),
        Err(e) => Err(orchestrator_error(e)),
    }
}
