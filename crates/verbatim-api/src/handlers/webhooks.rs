use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use verbatim_core::AppError;
use verbatim_services::WebhookOutcome;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// `applied`, `unknown_customer` or `ignored`
    pub outcome: String,
}

impl From<&WebhookOutcome> for WebhookAck {
    fn from(outcome: &WebhookOutcome) -> Self {
        let outcome = match outcome {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::UnknownCustomer { .. } => "unknown_customer",
            WebhookOutcome::Ignored { .. } => "ignored",
        };
        Self {
            received: true,
            outcome: outcome.to_string(),
        }
    }
}

/// Payment-provider subscription events.
///
/// Authenticated by the signature header, not by a bearer token. Unknown
/// customers and unhandled event types are acknowledged so the provider
/// stops retrying them.
#[utoipa::path(
    post,
    path = "/webhooks/payment-provider",
    tag = "webhooks",
    request_body(content = String, description = "Raw provider event JSON", content_type = "application/json"),
    params(
        ("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac-sha256>")
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed event", body = ErrorResponse),
        (status = 401, description = "Missing, invalid or expired signature", body = ErrorResponse),
        (status = 404, description = "Webhooks not configured", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(operation = "payment_provider_webhook", payload_bytes = body.len()))]
pub async fn payment_provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let service = state.entitlements.webhooks.as_ref().ok_or_else(|| {
        AppError::NotFound("Payment provider webhooks are not configured".to_string())
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = service.handle(&body, signature).await?;
    match &outcome {
        WebhookOutcome::Applied { user_id, status } => {
            tracing::info!(%user_id, %status, "Webhook applied");
        }
        WebhookOutcome::UnknownCustomer { customer_id } => {
            tracing::info!(%customer_id, "Webhook acknowledged for unknown customer");
        }
        WebhookOutcome::Ignored { event_type } => {
            tracing::debug!(%event_type, "Webhook event type not handled");
        }
    }

    Ok(Json(WebhookAck::from(&outcome)))
}
