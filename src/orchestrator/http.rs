//! Internal HTTP surface, called only by workers.
//!
//! Three endpoints: batched stats, batched errors, and the idempotent
//! completion signal. All are fire-and-forget from the worker's point of
//! view; a failed flush is retried on the next window.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::error::CrawlError;
use crate::store::{ErrorStore, ExecutionStore};
use crate::telemetry::{ErrorBatch, StatsBatch};

use super::service::ExecutionService;

#[derive(Clone)]
pub struct AppState {
    pub executions: ExecutionStore,
    pub errors: ErrorStore,
    pub service: Arc<ExecutionService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/internal/stats/batch", post(stats_batch))
        .route("/internal/errors/batch", post(errors_batch))
        .route(
            "/internal/executions/{id}/complete",
            post(execution_complete),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct ApiError(CrawlError);

impl From<CrawlError> for ApiError {
    fn from(error: CrawlError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("internal endpoint error: {}", self.0);
        let status = match &self.0 {
            CrawlError::Config(_) | CrawlError::Parse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

async fn stats_batch(
    State(state): State<AppState>,
    axum::Json(batch): axum::Json<StatsBatch>,
) -> Result<StatusCode, ApiError> {
    state.executions.apply_stats(&batch.updates).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn errors_batch(
    State(state): State<AppState>,
    axum::Json(batch): axum::Json<ErrorBatch>,
) -> Result<StatusCode, ApiError> {
    let flattened: Vec<_> = batch.errors.into_values().flatten().collect();
    state.errors.insert_batch(&flattened).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn execution_complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let finalized = state.service.finalize_completed(id).await?;
    Ok(axum::Json(serde_json::json!({ "finalized": finalized })))
}
