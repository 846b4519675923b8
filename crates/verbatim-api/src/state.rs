//! Application state.
//!
//! Services are held behind their concrete types; the stores, provider and
//! notifier they wrap are trait objects, so tests build the same state on
//! in-memory collaborators.

use sqlx::PgPool;
use std::sync::Arc;
use verbatim_infra::ChangeChannel;
use verbatim_services::{ProviderWebhookService, ReconciliationService, StoreAuthoritativeSource};

/// Entitlement services backing the HTTP endpoints
#[derive(Clone)]
pub struct EntitlementState {
    pub authoritative: StoreAuthoritativeSource,
    pub reconciliation: ReconciliationService,
    /// `None` when no webhook signing secret is configured; the endpoint then answers 404.
    pub webhooks: Option<ProviderWebhookService>,
    /// Feeds the per-user `/subscription-changes` streams.
    pub changes: Arc<dyn ChangeChannel>,
}

#[derive(Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
}

pub struct AppState {
    pub entitlements: EntitlementState,
    pub security: SecurityConfig,
    /// Database pool for readiness checks; absent for in-memory deployments.
    pub db_pool: Option<PgPool>,
}
