//! Hooks and traits for the entitlement collaborators
//!
//! The core never talks to a database, an HTTP endpoint or a clock directly.
//! Each collaborator is a trait here; `verbatim-db`, `verbatim-infra`,
//! `verbatim-api-client` and `verbatim-services` provide the implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    EntitlementSnapshot, SessionContext, SubscriptionChange, SubscriptionRecord,
    SubscriptionUpdate, VerificationResult,
};

/// Durable subscription + trial state, owned by the backend.
///
/// Only the webhook handler and the verifier write through this trait.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn find_subscription(&self, user_id: Uuid)
        -> Result<Option<SubscriptionRecord>, AppError>;

    /// Lookup used to route provider webhooks to a user.
    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError>;

    /// Resolve a provider customer to a user (profile or existing subscription row).
    async fn find_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Uuid>, AppError>;

    async fn trial_started_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Insert or overwrite the user's subscription row. `verified_at`, when
    /// given, becomes the new `last_verified_at`.
    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<SubscriptionRecord, AppError>;

    async fn touch_verified(&self, user_id: Uuid, verified_at: DateTime<Utc>)
        -> Result<(), AppError>;
}

/// The read-only authoritative query (`can_user_record`).
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    async fn fetch(&self, session: &SessionContext) -> Result<EntitlementSnapshot, AppError>;
}

/// Round trip to the reconciliation endpoint.
///
/// Network or provider failures surface as `AppError::VerificationUnavailable`
/// and must not have written anything.
#[async_trait]
pub trait SubscriptionVerifier: Send + Sync {
    async fn verify(
        &self,
        session: &SessionContext,
        force_refresh: bool,
    ) -> Result<VerificationResult, AppError>;
}

/// Publisher side of the change propagation channel
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, change: SubscriptionChange) -> Result<(), AppError>;
}

/// Notifier for deployments where the store itself emits change events
pub struct NoOpChangeNotifier;

#[async_trait]
impl ChangeNotifier for NoOpChangeNotifier {
    async fn notify(&self, _change: SubscriptionChange) -> Result<(), AppError> {
        Ok(())
    }
}

/// Source of `now` for freshness and resolution
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
