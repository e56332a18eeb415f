//! API route definitions
//!
//! Organizes endpoints for the monitoring dashboard and sensor adapters:
//! - /api/v1/observations - observation ingestion
//! - /api/v1/incidents/* - incident queries and operator transitions
//! - /api/v1/subjects/:id/state - live subject state
//! - /api/v1/medications/confirm - dose confirmation
//! - /api/v1/status, /api/v1/config - system introspection

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, DashboardState};

/// Create all API routes for the dashboard and sensor adapters.
pub fn api_routes(state: DashboardState) -> Router {
    Router::new()
        .route("/observations", post(handlers::post_observation))
        .route("/incidents/active", get(handlers::get_active_incidents))
        .route("/incidents/history", get(handlers::get_incident_history))
        .route(
            "/incidents/:id/acknowledge",
            post(handlers::acknowledge_incident),
        )
        .route("/incidents/:id/dismiss", post(handlers::dismiss_incident))
        .route("/subjects/:id/state", get(handlers::get_subject_state))
        .route("/medications/confirm", post(handlers::confirm_dose))
        .route("/status", get(handlers::get_status))
        .route("/config", get(handlers::get_config))
        .with_state(state)
}

/// Legacy health endpoint at root level.
pub fn legacy_routes() -> Router {
    Router::new().route("/health", get(handlers::legacy_health_check))
}
