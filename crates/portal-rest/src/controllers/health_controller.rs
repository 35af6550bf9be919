//! Health check controller.

use crate::state::{AppState, DatabaseProbe};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use portal_jobs::JobQueue;
use serde::Serialize;
use tracing::warn;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy` when the database answers, otherwise `unhealthy`.
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    /// Queue backend reachability. Absent when no backend is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<bool>,
}

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports database and queue backend reachability. Only the database
/// decides the status code; the portal keeps serving without the queue.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.database.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            false
        }
    };

    let queue = match &state.queue_admin {
        Some(admin) => Some(admin.queue().health_check().await.is_ok()),
        None => None,
    };

    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = HealthResponse {
        status: if database { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        queue,
    };
    (status, Json(body))
}
