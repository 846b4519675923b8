//! Payment provider abstraction.
//!
//! The provider is the external system of record for subscriptions. Only the
//! subscription object is read; checkout and billing portal flows live elsewhere.

#[cfg(feature = "provider-stripe")]
mod stripe;

#[cfg(feature = "provider-stripe")]
pub use stripe::StripeProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verbatim_core::models::{CancellationReason, SubscriptionStatus, SubscriptionUpdate};
use verbatim_core::AppError;

/// Reads subscription objects from the payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, AppError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationDetails {
    pub reason: Option<String>,
}

/// Provider subscription object. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub cancellation_details: Option<CancellationDetails>,
}

impl ProviderSubscription {
    pub fn mapped_status(&self) -> SubscriptionStatus {
        map_provider_status(&self.status)
    }

    /// Write-back payload for the stored record.
    pub fn to_update(&self) -> SubscriptionUpdate {
        let status = self.mapped_status();
        let cancellation_reason = if status == SubscriptionStatus::Canceled {
            Some(
                self.cancellation_details
                    .as_ref()
                    .and_then(|d| d.reason.as_deref())
                    .map(CancellationReason::from_provider)
                    .unwrap_or(CancellationReason::Other),
            )
        } else {
            None
        };

        SubscriptionUpdate {
            status,
            provider_customer_id: Some(self.customer.clone()),
            provider_subscription_id: Some(self.id.clone()),
            current_period_start: self.current_period_start.and_then(from_unix),
            current_period_end: self.current_period_end.and_then(from_unix),
            canceled_at: self.canceled_at.and_then(from_unix),
            cancellation_reason,
        }
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Map the provider's status vocabulary onto the stored status.
///
/// Unknown statuses are stored as `billing_issue`, which grants no access.
pub fn map_provider_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "canceled" => SubscriptionStatus::Canceled,
        "past_due" => SubscriptionStatus::PastDue,
        "incomplete" => SubscriptionStatus::Incomplete,
        "incomplete_expired" => SubscriptionStatus::Expired,
        "unpaid" | "paused" => SubscriptionStatus::BillingIssue,
        other => {
            tracing::warn!(status = other, "Unknown provider subscription status");
            SubscriptionStatus::BillingIssue
        }
    }
}
