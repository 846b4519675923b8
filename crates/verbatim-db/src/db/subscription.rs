use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;
use verbatim_core::models::{SubscriptionRecord, SubscriptionUpdate};
use verbatim_core::{AppError, EntitlementStore};

/// Repository for subscription rows and profile trial state
#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the subscription row for a user
    #[tracing::instrument(skip(self), fields(db.table = "subscriptions", db.operation = "select"))]
    pub async fn get_by_user(&self, user_id: Uuid) -> Result<Option<SubscriptionRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, SubscriptionRecord>(
            "SELECT * FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get the subscription row by the provider's subscription id
    #[tracing::instrument(skip(self), fields(db.table = "subscriptions", db.operation = "select"))]
    pub async fn get_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, SubscriptionRecord>(
            "SELECT * FROM subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Find the user owning a provider customer id
    #[tracing::instrument(skip(self), fields(db.table = "profiles", db.operation = "select"))]
    pub async fn get_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        let user_id = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT user_id FROM profiles WHERE provider_customer_id = $1
            UNION
            SELECT user_id FROM subscriptions WHERE provider_customer_id = $1
            LIMIT 1
            "#,
        )
        .bind(provider_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    /// Trial start recorded on the user's profile
    #[tracing::instrument(skip(self), fields(db.table = "profiles", db.operation = "select"))]
    pub async fn get_trial_started_at(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let started = sqlx::query_scalar::<Postgres, Option<DateTime<Utc>>>(
            "SELECT trial_started_at FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(started.flatten())
    }

    /// Insert or overwrite the user's subscription row
    #[tracing::instrument(skip(self, update), fields(db.table = "subscriptions", db.operation = "upsert", status = %update.status))]
    pub async fn upsert(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<SubscriptionRecord, AppError> {
        let record = sqlx::query_as::<Postgres, SubscriptionRecord>(
            r#"
            INSERT INTO subscriptions (
                user_id, status, provider_customer_id, provider_subscription_id,
                current_period_start, current_period_end, canceled_at,
                cancellation_reason, last_verified_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE
            SET status = EXCLUDED.status,
                provider_customer_id = COALESCE(EXCLUDED.provider_customer_id, subscriptions.provider_customer_id),
                provider_subscription_id = COALESCE(EXCLUDED.provider_subscription_id, subscriptions.provider_subscription_id),
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                canceled_at = EXCLUDED.canceled_at,
                cancellation_reason = EXCLUDED.cancellation_reason,
                last_verified_at = COALESCE(EXCLUDED.last_verified_at, subscriptions.last_verified_at),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(update.status)
        .bind(&update.provider_customer_id)
        .bind(&update.provider_subscription_id)
        .bind(update.current_period_start)
        .bind(update.current_period_end)
        .bind(update.canceled_at)
        .bind(update.cancellation_reason)
        .bind(verified_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Refresh `last_verified_at` without touching anything else
    #[tracing::instrument(skip(self), fields(db.table = "subscriptions", db.operation = "update"))]
    pub async fn mark_verified(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_verified_at = $2,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(verified_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "No subscription for user {}",
                user_id
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for SubscriptionRepository {
    async fn find_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        self.get_by_user(user_id).await
    }

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        self.get_by_provider_subscription(provider_subscription_id)
            .await
    }

    async fn find_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        self.get_user_by_provider_customer(provider_customer_id)
            .await
    }

    async fn trial_started_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, AppError> {
        self.get_trial_started_at(user_id).await
    }

    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<SubscriptionRecord, AppError> {
        self.upsert(user_id, update, verified_at).await
    }

    async fn touch_verified(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.mark_verified(user_id, verified_at).await
    }
}
