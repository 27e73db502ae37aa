use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{batch, handlers, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Batch queue
        .route("/batch/jobs", post(batch::enqueue))
        .route("/batch/status", get(batch::get_status))
        .route("/batch/results", post(batch::get_full_results))
        .route("/batch/pause", post(batch::pause))
        .route("/batch/resume", post(batch::resume))
        .route("/batch/clear", post(batch::clear_all))
        .route("/batch/concurrency", put(batch::set_concurrency))
        .route("/batch/delete", post(batch::delete_job))
        .route("/batch/retry", post(batch::retry_job))
        .route("/batch/retry-failed", post(batch::retry_all_failed))
        .route("/batch/progress", post(batch::report_progress))
        // Direct rendering and stored archives
        .route("/render", post(batch::render))
        .route("/archives/{key}", get(batch::get_archive));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
