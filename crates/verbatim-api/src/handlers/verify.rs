use crate::auth::AuthUser;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use verbatim_core::models::{VerificationRequest, VerificationResult};

/// Reconcile the caller's subscription with the payment provider.
///
/// Idempotent. Without `forceRefresh` a recently verified record is answered
/// from the store without calling the provider.
#[utoipa::path(
    post,
    path = "/verify-subscription",
    tag = "entitlements",
    request_body = VerificationRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerificationResult),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 503, description = "Payment provider unreachable; nothing was written", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip_all,
    fields(user_id = %user.user_id, force_refresh = request.force_refresh, operation = "verify_subscription")
)]
pub async fn verify_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<VerificationRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let result = state
        .entitlements
        .reconciliation
        .reconcile(user.user_id, request.force_refresh)
        .await?;

    tracing::info!(
        status = %result.status,
        status_changed = result.status_changed,
        can_record = result.can_record,
        "Subscription verified"
    );

    Ok(Json(result))
}
