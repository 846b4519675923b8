//! Database repositories for data access layer
//!
//! The subscription repository is the only writer-facing view of the
//! entitlement record store; callers reach it through `EntitlementStore`.

pub mod subscription;

pub use subscription::SubscriptionRepository;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Open a connection pool using the configured limits.
pub async fn connect(database_url: &str, max_connections: u32, timeout_secs: u64) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(max_connections, "Database pool ready");
    Ok(pool)
}

/// Apply the workspace migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(())
}
