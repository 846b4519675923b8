use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// Subscription status as stored in the entitlement record store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "subscription_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Canceled,
    Expired,
    PastDue,
    Incomplete,
    BillingIssue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::BillingIssue => "billing_issue",
        }
    }

    /// Statuses that grant access on their own, independent of period bounds.
    pub fn is_paying(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    /// Billing-problem statuses. These grant no access and have no grace period.
    pub fn is_billing_issue(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::PastDue
                | SubscriptionStatus::Incomplete
                | SubscriptionStatus::BillingIssue
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "billing_issue" => Ok(SubscriptionStatus::BillingIssue),
            other => Err(AppError::InvalidInput(format!(
                "Unknown subscription status: {}",
                other
            ))),
        }
    }
}

/// Why a subscription was canceled, in the payment provider's vocabulary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "cancellation_reason", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    CancellationRequested,
    PaymentFailed,
    PaymentDisputed,
    Other,
}

impl CancellationReason {
    /// Map the provider's `cancellation_details.reason`; anything unrecognised is `Other`.
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "cancellation_requested" => CancellationReason::CancellationRequested,
            "payment_failed" => CancellationReason::PaymentFailed,
            "payment_disputed" => CancellationReason::PaymentDisputed,
            _ => CancellationReason::Other,
        }
    }
}

/// Subscription row, one per user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: SubscriptionStatus,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<CancellationReason>,
    /// Set whenever the record was last reconciled against the provider.
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// A period that ends before it starts cannot be trusted for gating.
    pub fn check_consistency(&self) -> Result<(), AppError> {
        match (self.current_period_start, self.current_period_end) {
            (Some(start), Some(end)) if end < start => Err(AppError::InconsistentRecord(format!(
                "subscription {} period ends {} before it starts {}",
                self.id, end, start
            ))),
            _ => Ok(()),
        }
    }

    /// Canceled, but the paid period has not run out yet.
    pub fn in_grace_window(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Canceled
            && self.current_period_end.is_some_and(|end| end > now)
    }

    /// Apply a write-back, returning whether anything the resolver reads changed.
    pub fn apply(&mut self, update: &SubscriptionUpdate) -> bool {
        let material = self.status != update.status
            || self.current_period_start != update.current_period_start
            || self.current_period_end != update.current_period_end
            || self.canceled_at != update.canceled_at;

        self.status = update.status;
        self.current_period_start = update.current_period_start;
        self.current_period_end = update.current_period_end;
        self.canceled_at = update.canceled_at;
        self.cancellation_reason = update.cancellation_reason;
        if update.provider_customer_id.is_some() {
            self.provider_customer_id = update.provider_customer_id.clone();
        }
        if update.provider_subscription_id.is_some() {
            self.provider_subscription_id = update.provider_subscription_id.clone();
        }
        material
    }
}

/// Write-back payload produced by the verifier and the webhook handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub status: SubscriptionStatus,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<CancellationReason>,
}
