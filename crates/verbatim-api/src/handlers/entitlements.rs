use crate::auth::AuthUser;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use verbatim_core::models::EntitlementSnapshot;

#[utoipa::path(
    get,
    path = "/rpc/can_user_record",
    tag = "entitlements",
    responses(
        (status = 200, description = "Current access decision and the row it was derived from", body = EntitlementSnapshot),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, operation = "can_user_record"))]
pub async fn can_user_record(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, HttpAppError> {
    let snapshot = state
        .entitlements
        .authoritative
        .snapshot(user.user_id)
        .await?;
    Ok(Json(snapshot))
}

/// Same decision as `can_user_record`; recording and viewing are gated together.
#[utoipa::path(
    get,
    path = "/rpc/can_access_features",
    tag = "entitlements",
    responses(
        (status = 200, description = "Current access decision and the row it was derived from", body = EntitlementSnapshot),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, operation = "can_access_features"))]
pub async fn can_access_features(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, HttpAppError> {
    let snapshot = state
        .entitlements
        .authoritative
        .snapshot(user.user_id)
        .await?;
    Ok(Json(snapshot))
}
