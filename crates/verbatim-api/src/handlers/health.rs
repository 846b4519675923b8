//! Health check handlers.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use std::time::Duration;

const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness check: process is running.
pub async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}

/// Readiness check: the entitlement store is reachable.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(pool) = state.db_pool.as_ref() else {
        return (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready", "database": "not_configured" })),
        );
    };

    match tokio::time::timeout(READINESS_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready", "database": "ready" })),
        ),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Database readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": format!("not_ready: {}", e)
                })),
            )
        }
        Err(_) => {
            tracing::error!("Database readiness check timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "not_ready", "database": "timeout" })),
            )
        }
    }
}
