//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::confidence::calibration::CalibrationReport;
use crate::confidence::ScoreRequest;
use crate::engine::Core;
use crate::streak::LaneSnapshot;
use crate::types::{ConfidenceScore, MarketKey, PropLineError, Side};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub core: Arc<Core>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub uptime_secs: i64,
    pub markets_tracked: usize,
    pub observations: usize,
    pub outcomes: usize,
    pub lanes: usize,
    pub lanes_in_progress: usize,
}

/// Query string for `GET /api/score`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreQuery {
    pub subject_id: String,
    pub market: String,
    pub side: Side,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl From<ScoreQuery> for ScoreRequest {
    fn from(q: ScoreQuery) -> Self {
        ScoreRequest {
            key: MarketKey::new(q.subject_id, q.market),
            side: q.side,
            as_of: q.as_of,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps core errors onto HTTP statuses.
pub struct ApiError(PropLineError);

impl From<PropLineError> for ApiError {
    fn from(e: PropLineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PropLineError::LaneNotFound(_) => StatusCode::NOT_FOUND,
            PropLineError::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_conflict() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let core = &state.core;
    let lanes = core.lanes().snapshots().await;
    Json(StatusResponse {
        name: core.config().agent.name.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        markets_tracked: core.observations().keys().len(),
        observations: core.observations().len(),
        outcomes: core.outcomes().len(),
        lanes: lanes.len(),
        lanes_in_progress: lanes
            .iter()
            .filter(|l| l.status == crate::streak::LaneStatus::InProgress)
            .count(),
    })
}

/// GET /api/lanes
pub async fn get_lanes(State(state): State<AppState>) -> Json<Vec<LaneSnapshot>> {
    Json(state.core.lanes().snapshots().await)
}

/// GET /api/lanes/:lane_id
pub async fn get_lane(
    State(state): State<AppState>,
    Path(lane_id): Path<String>,
) -> Result<Json<LaneSnapshot>, ApiError> {
    Ok(Json(state.core.lanes().snapshot(&lane_id).await?))
}

/// GET /api/score?subject_id=..&market=..&side=over
pub async fn get_score(State(state): State<AppState>, Query(query): Query<ScoreQuery>) -> Json<ConfidenceScore> {
    Json(state.core.score(&query.into()))
}

/// POST /api/score with a JSON array of requests. Results keep request order.
pub async fn post_scores(
    State(state): State<AppState>,
    Json(requests): Json<Vec<ScoreRequest>>,
) -> Json<Vec<ConfidenceScore>> {
    Json(state.core.score_many(requests).await)
}

/// GET /api/calibration
pub async fn get_calibration(State(state): State<AppState>) -> Json<CalibrationReport> {
    Json(state.core.confidence().calibration())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
