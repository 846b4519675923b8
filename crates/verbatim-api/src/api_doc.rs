//! OpenAPI documentation, served at `/api/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error;
use crate::handlers;
use verbatim_core::models;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Verbatim Entitlements API",
        version = "0.1.0",
        description = "Authoritative access decisions, subscription verification against the payment provider, change streams and provider webhooks."
    ),
    paths(
        handlers::entitlements::can_user_record,
        handlers::entitlements::can_access_features,
        handlers::verify::verify_subscription,
        handlers::changes::subscription_changes,
        handlers::webhooks::payment_provider_webhook,
    ),
    components(schemas(
        models::EntitlementSnapshot,
        models::AccessDecision,
        models::AccessReason,
        models::SubscriptionRecord,
        models::SubscriptionStatus,
        models::CancellationReason,
        models::VerificationRequest,
        models::VerificationResult,
        handlers::webhooks::WebhookAck,
        error::ErrorResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "entitlements", description = "Access decisions and subscription verification"),
        (name = "webhooks", description = "Payment provider events")
    )
)]
pub struct ApiDoc;
