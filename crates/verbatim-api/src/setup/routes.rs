//! Route configuration and middleware setup

use crate::api_doc::ApiDoc;
use crate::auth::{auth_middleware, AuthState};
use crate::handlers::{changes, entitlements, health, verify, webhooks};
use crate::state::AppState;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;
use verbatim_core::Config;

/// Provider events are small; anything larger is not a subscription event.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Setup all application routes with middleware
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config);
    let auth_state = Arc::new(AuthState::new(&state.security.jwt_secret));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(10_000)
        .max(1);

    let protected = Router::new()
        .route("/rpc/can_user_record", get(entitlements::can_user_record))
        .route(
            "/rpc/can_access_features",
            get(entitlements::can_access_features),
        )
        .route("/verify-subscription", post(verify::verify_subscription))
        .route("/subscription-changes", get(changes::subscription_changes))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ));

    let app = public_routes()
        .merge(protected)
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state);

    Ok(app)
}

/// Public routes (no bearer token; webhooks carry their own signature)
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::liveness_check))
        .route("/live", get(health::liveness_check))
        .route("/ready", get(health::readiness_check))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route(
            "/webhooks/payment-provider",
            post(webhooks::payment_provider_webhook),
        )
}

fn setup_cors(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}
