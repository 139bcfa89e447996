use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::history::{History, HistoryEntry};
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use crate::recommendation::{RecommendationSet, SourceReport};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    history: Arc<History>,
}

impl AppState {
    /// `history` should also be the pipeline's store for `/history` to show runs.
    pub fn new(pipeline: Arc<Pipeline>, history: Arc<History>) -> Self {
        Self { pipeline, history }
    }
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/recommend", post(recommend))
        .route("/history", get(history))
        .route("/debug/sources", get(debug_sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

#[derive(Deserialize)]
struct RecommendReq {
    query: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources: Option<Vec<SourceReport>>,
}

/// Wire form of a [`PipelineError`].
pub struct ApiError(pub PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidIntent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::NoDataAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::NoEligibleOffers { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            sources: match &self.0 {
                PipelineError::NoDataAvailable { sources } => Some(sources.clone()),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

async fn recommend(
    State(state): State<AppState>,
    Json(body): Json<RecommendReq>,
) -> Result<Json<RecommendationSet>, ApiError> {
    state
        .pipeline
        .recommend(&body.query)
        .await
        .map(Json)
        .map_err(ApiError)
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(p): Query<HistoryParams>,
) -> Json<Vec<HistoryEntry>> {
    let n = p.limit.unwrap_or(20).clamp(1, 500);
    Json(state.history.snapshot_last_n(n))
}

#[derive(Serialize)]
struct SourcesInfo {
    sources: Vec<String>,
    overlay: String,
    runs_recorded: usize,
}

async fn debug_sources(State(state): State<AppState>) -> Json<SourcesInfo> {
    Json(SourcesInfo {
        sources: state.pipeline.source_ids(),
        overlay: state.pipeline.overlay_name().to_string(),
        runs_recorded: state.history.len(),
    })
}
