//! API route handlers
//!
//! Request handling for the monitoring API: observation ingestion,
//! incident queries and operator transitions, subject state snapshots,
//! medication confirmation, and system status.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::engine::{EngineError, MonitorEngine};
use crate::medication::{MedicationError, MedicationScheduler};
use crate::types::RawObservation;

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub engine: Arc<MonitorEngine>,
    pub medication: Arc<MedicationScheduler>,
    /// Service start time, for the uptime field on /status
    pub started_at: std::time::Instant,
}

impl DashboardState {
    pub fn new(engine: Arc<MonitorEngine>, medication: Arc<MedicationScheduler>) -> Self {
        Self {
            engine,
            medication,
            started_at: std::time::Instant::now(),
        }
    }
}

fn engine_error(e: &EngineError) -> Response {
    match e {
        EngineError::IncidentNotFound(_) | EngineError::SubjectNotFound(_) => {
            ApiErrorResponse::not_found(e.to_string())
        }
        EngineError::InvalidTransition { .. } => ApiErrorResponse::bad_request(e.to_string()),
        EngineError::Store(_) => ApiErrorResponse::internal(e.to_string()),
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Ingestion acknowledgment returned to sensor adapters.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// POST /api/v1/observations — ingest one raw observation.
///
/// Rejections are expected domain outcomes (malformed payloads,
/// out-of-order timestamps), reported in-band rather than as HTTP errors.
pub async fn post_observation(
    State(state): State<DashboardState>,
    Json(raw): Json<RawObservation>,
) -> Response {
    match state.engine.ingest(raw).await {
        Ok(()) => ApiResponse::ok(IngestResponse {
            accepted: true,
            reason: None,
        }),
        Err(reason) => ApiResponse::ok(IngestResponse {
            accepted: false,
            reason: Some(reason.to_string()),
        }),
    }
}

// ============================================================================
// Incidents
// ============================================================================

/// GET /api/v1/incidents/active — all open/notified incidents.
pub async fn get_active_incidents(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(state.engine.active_incidents())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub subject_id: String,
    #[serde(default)]
    pub since_ms: u64,
}

/// GET /api/v1/incidents/history?subject_id=..&since_ms=.. — per-subject
/// incident history, oldest first.
pub async fn get_incident_history(
    State(state): State<DashboardState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    ApiResponse::ok(
        state
            .engine
            .incident_history(&query.subject_id, query.since_ms),
    )
}

/// POST /api/v1/incidents/:id/acknowledge — operator acknowledges.
pub async fn acknowledge_incident(
    State(state): State<DashboardState>,
    Path(incident_id): Path<String>,
) -> Response {
    match state.engine.acknowledge(&incident_id).await {
        Ok(incident) => ApiResponse::ok(incident),
        Err(e) => engine_error(&e),
    }
}

/// POST /api/v1/incidents/:id/dismiss — operator clears. Cancels any
/// in-flight dispatch retries for the incident.
pub async fn dismiss_incident(
    State(state): State<DashboardState>,
    Path(incident_id): Path<String>,
) -> Response {
    match state.engine.dismiss(&incident_id).await {
        Ok(incident) => ApiResponse::ok(incident),
        Err(e) => engine_error(&e),
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// GET /api/v1/subjects/:id/state — live state snapshot.
pub async fn get_subject_state(
    State(state): State<DashboardState>,
    Path(subject_id): Path<String>,
) -> Response {
    match state.engine.subject_state(&subject_id).await {
        Ok(view) => ApiResponse::ok(view),
        Err(e) => engine_error(&e),
    }
}

// ============================================================================
// Medications
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConfirmDoseRequest {
    pub subject_id: String,
    pub medication: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmDoseResponse {
    pub confirmed: bool,
    pub dose_slot: String,
}

/// POST /api/v1/medications/confirm — record a dose as taken.
pub async fn confirm_dose(
    State(state): State<DashboardState>,
    Json(req): Json<ConfirmDoseRequest>,
) -> Response {
    match state
        .medication
        .confirm_dose(&req.subject_id, &req.medication, chrono::Utc::now())
    {
        Ok(slot) => ApiResponse::ok(ConfirmDoseResponse {
            confirmed: true,
            dose_slot: slot.to_rfc3339(),
        }),
        Err(e @ (MedicationError::UnknownSubject(_) | MedicationError::UnknownMedication(_))) => {
            ApiErrorResponse::not_found(e.to_string())
        }
        Err(e) => ApiErrorResponse::bad_request(e.to_string()),
    }
}

// ============================================================================
// Status / Config
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub subjects: usize,
    #[serde(flatten)]
    pub stats: crate::engine::EngineStats,
}

/// GET /api/v1/status — engine counters and uptime.
pub async fn get_status(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(StatusResponse {
        status: "monitoring",
        uptime_secs: state.started_at.elapsed().as_secs(),
        subjects: state.engine.config().subjects.len(),
        stats: state.engine.stats(),
    })
}

/// GET /api/v1/config — the effective monitor configuration.
pub async fn get_config(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(state.engine.config().clone())
}

/// GET /health — legacy liveness probe at the root.
pub async fn legacy_health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
