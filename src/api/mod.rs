//! HTTP API for dashboards and sensor adapters
//!
//! Thin axum layer over the monitor engine. All responses use the
//! envelope in [`envelope`]; routing lives in [`routes`].

mod envelope;
mod handlers;
mod routes;

pub use envelope::{ApiErrorResponse, ApiResponse};
pub use handlers::DashboardState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete application router.
pub fn create_app(state: DashboardState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .merge(routes::legacy_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
