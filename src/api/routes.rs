use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::AppError;
use crate::fetcher::{FetchStats, PairSource};
use crate::pipeline::{PipelineStats, ScreeningPipeline};
use crate::types::NormalizedPairEvent;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ScreeningPipeline>,
    pub sources: Vec<Arc<dyn PairSource>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats", get(get_stats))
        .route("/pairs/:address", get(get_pair))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub backoff_active: bool,
    pub last_scan_ms: Option<u64>,
    pub errors: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" while loops run and no source is backed off, "degraded" otherwise.
    pub status: &'static str,
    pub pipeline_running: bool,
    pub last_queued_at_ms: Option<u64>,
    pub queue_pending: u64,
    pub sources: Vec<SourceHealth>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub pipeline: PipelineStats,
    pub fetchers: Vec<FetchStats>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let health = state.pipeline.health();
    let sources: Vec<SourceHealth> = state
        .pipeline
        .scheduler()
        .stats()
        .into_iter()
        .map(|s| SourceHealth {
            source: s.source,
            backoff_active: s.backoff_active,
            last_scan_ms: s.last_scan_ms,
            errors: s.errors,
        })
        .collect();

    let running = health.pipeline_running();
    let status = if running && sources.iter().all(|s| !s.backoff_active) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        pipeline_running: running,
        last_queued_at_ms: health.last_queued_at_ms(),
        queue_pending: health.queue_pending(),
        sources,
    })
}

async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        pipeline: state.pipeline.stats(),
        fetchers: state.sources.iter().map(|s| s.fetch_stats()).collect(),
    })
}

async fn get_pair(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<NormalizedPairEvent>, AppError> {
    state
        .pipeline
        .cached(&address)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("pair {address} not cached")))
}
