//! Application setup and initialization
//!
//! Startup order: validate configuration, tracing, database and migrations,
//! entitlement services, then the router.

pub mod routes;
pub mod server;

use crate::state::{AppState, EntitlementState, SecurityConfig};
use anyhow::Context;
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use verbatim_core::{ChangeNotifier, Config, EntitlementStore};
use verbatim_db::SubscriptionRepository;
use verbatim_infra::{init_telemetry, ChangeChannel, PgChangeChannel, PgChangeNotifier};
use verbatim_services::{
    PaymentProvider, ProviderWebhookService, ReconciliationService, StoreAuthoritativeSource,
    StripeProvider,
};

/// Initialize the application: telemetry, database, services and routes
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, Router), anyhow::Error> {
    config.validate()?;

    init_telemetry("verbatim-api", config.is_production())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment,
        port = config.server_port,
        "Starting Verbatim entitlement API"
    );

    let pool = verbatim_db::connect(
        &config.database_url,
        config.db_max_connections,
        config.db_timeout_seconds,
    )
    .await?;
    verbatim_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let state = Arc::new(build_state(&config, pool)?);
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}

/// Wire the Postgres-backed store, notifier and payment provider into the services.
pub fn build_state(config: &Config, pool: PgPool) -> Result<AppState, anyhow::Error> {
    let store: Arc<dyn EntitlementStore> = Arc::new(SubscriptionRepository::new(pool.clone()));
    let notifier: Arc<dyn ChangeNotifier> = Arc::new(PgChangeNotifier::new(
        pool.clone(),
        config.change_channel_name.clone(),
    ));
    // Each open change stream holds its own LISTEN connection.
    let changes: Arc<dyn ChangeChannel> = Arc::new(PgChangeChannel::new(
        pool.clone(),
        config.change_channel_name.clone(),
    ));

    let secret_key = config.provider_secret_key.clone().unwrap_or_else(|| {
        tracing::warn!("PAYMENT_PROVIDER_SECRET_KEY not set, verification will report unavailable");
        String::new()
    });
    let provider: Arc<dyn PaymentProvider> = Arc::new(
        StripeProvider::new(
            config.provider_api_url.clone(),
            secret_key,
            config.verifier_timeout(),
        )
        .context("Failed to create payment provider client")?,
    );

    let webhooks = match config.provider_webhook_secret.as_deref() {
        Some(secret) => Some(
            ProviderWebhookService::new(store.clone(), notifier.clone(), secret)
                .with_tolerance(config.webhook_tolerance()),
        ),
        None => {
            tracing::warn!("PAYMENT_PROVIDER_WEBHOOK_SECRET not set, webhook endpoint disabled");
            None
        }
    };

    let entitlements = EntitlementState {
        authoritative: StoreAuthoritativeSource::new(store.clone())
            .with_resolver(config.resolver()),
        reconciliation: ReconciliationService::new(store, provider, notifier)
            .with_resolver(config.resolver())
            .with_freshness(config.freshness_policy())
            .with_timeout(config.verifier_timeout()),
        webhooks,
        changes,
    };

    Ok(AppState {
        entitlements,
        security: SecurityConfig {
            jwt_secret: config.jwt_secret.clone(),
        },
        db_pool: Some(pool),
    })
}
