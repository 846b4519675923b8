//! Test helpers: build AppState and router on in-memory collaborators.
//!
//! Run from workspace root: `cargo test -p verbatim-api`. No database is
//! needed; the store, payment provider and clock come from
//! `verbatim_services::test_helpers`.

#![allow(dead_code)]

pub mod auth;

use axum::Router;
use axum_test::TestServer;
use std::sync::Arc;
use verbatim_api::setup::routes;
use verbatim_api::state::{AppState, EntitlementState, SecurityConfig};
use verbatim_core::constants::{
    CHANGE_CHANNEL_NAME, FREE_TRIAL_DAYS, FRESHNESS_THRESHOLD_SECS, VERIFIER_TIMEOUT_SECS,
    WEBHOOK_TOLERANCE_SECS,
};
use verbatim_core::Config;
use verbatim_infra::ChangeHub;
use verbatim_services::test_helpers::{test_now, ManualClock, MemoryEntitlementStore, ScriptedProvider};
use verbatim_services::{ProviderWebhookService, ReconciliationService, StoreAuthoritativeSource};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret-at-least-32-characters-long";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test application: server plus handles on every collaborator.
pub struct TestApp {
    pub server: TestServer,
    pub store: MemoryEntitlementStore,
    pub provider: Arc<ScriptedProvider>,
    pub hub: ChangeHub,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub fn test_config() -> Config {
    Config {
        server_port: 0,
        environment: "test".to_string(),
        cors_origins: vec!["*".to_string()],
        database_url: "postgres://unused".to_string(),
        db_max_connections: 1,
        db_timeout_seconds: 1,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        freshness_threshold_secs: FRESHNESS_THRESHOLD_SECS,
        free_trial_days: FREE_TRIAL_DAYS,
        verifier_timeout_secs: VERIFIER_TIMEOUT_SECS,
        change_channel_name: CHANGE_CHANNEL_NAME.to_string(),
        provider_api_url: "http://provider.invalid".to_string(),
        provider_secret_key: None,
        provider_webhook_secret: Some(TEST_WEBHOOK_SECRET.to_string()),
        webhook_tolerance_secs: WEBHOOK_TOLERANCE_SECS,
    }
}

/// Setup a test app with webhooks enabled.
pub fn setup_test_app() -> TestApp {
    build_test_app(true).0
}

/// Setup a test app without a webhook signing secret.
pub fn setup_test_app_without_webhooks() -> TestApp {
    build_test_app(false).0
}

/// Serve the app on a local port for clients that speak real HTTP, such as
/// `verbatim_api_client`. Returns the app handles and the base URL.
pub async fn serve_test_app() -> (TestApp, String) {
    let (app, router) = build_test_app(true);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (app, format!("http://{}", addr))
}

fn build_test_app(webhooks_enabled: bool) -> (TestApp, Router) {
    let mut config = test_config();
    if !webhooks_enabled {
        config.provider_webhook_secret = None;
    }

    let store = MemoryEntitlementStore::new();
    let provider = Arc::new(ScriptedProvider::new());
    let hub = ChangeHub::default();
    let clock = Arc::new(ManualClock::new(test_now()));

    let webhooks = config.provider_webhook_secret.as_deref().map(|secret| {
        ProviderWebhookService::new(Arc::new(store.clone()), Arc::new(hub.clone()), secret)
            .with_clock(clock.clone())
    });

    let state = Arc::new(AppState {
        entitlements: EntitlementState {
            authoritative: StoreAuthoritativeSource::new(Arc::new(store.clone()))
                .with_clock(clock.clone()),
            reconciliation: ReconciliationService::new(
                Arc::new(store.clone()),
                provider.clone(),
                Arc::new(hub.clone()),
            )
            .with_clock(clock.clone()),
            webhooks,
            changes: Arc::new(hub.clone()),
        },
        security: SecurityConfig {
            jwt_secret: config.jwt_secret.clone(),
        },
        db_pool: None,
    });

    let app = routes::setup_routes(&config, state).expect("Failed to build router");
    let server =
        TestServer::new(app.clone().into_make_service()).expect("Failed to create test server");

    (
        TestApp {
            server,
            store,
            provider,
            hub,
            clock,
        },
        app,
    )
}
