use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::subscription::SubscriptionRecord;

/// Machine-readable reason behind an access decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    ActiveSubscription,
    CanceledButActive,
    ActiveTrial,
    TrialExpired,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::ActiveSubscription => "active_subscription",
            AccessReason::CanceledButActive => "canceled_but_active",
            AccessReason::ActiveTrial => "active_trial",
            AccessReason::TrialExpired => "trial_expired",
        }
    }

    pub fn grants_access(&self) -> bool {
        !matches!(self, AccessReason::TrialExpired)
    }
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical output of the access resolver.
///
/// `can_record` and `can_access_features` are always equal and are true
/// exactly when `reason` is not `trial_expired`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub can_record: bool,
    pub can_access_features: bool,
    pub reason: AccessReason,
    pub access_ends_at: Option<DateTime<Utc>>,
    pub days_until_access_ends: u32,
    pub trial_days_remaining: u32,
}

impl AccessDecision {
    pub fn new(
        reason: AccessReason,
        access_ends_at: Option<DateTime<Utc>>,
        days_until_access_ends: u32,
        trial_days_remaining: u32,
    ) -> Self {
        let allowed = reason.grants_access();
        Self {
            can_record: allowed,
            can_access_features: allowed,
            reason,
            access_ends_at,
            days_until_access_ends,
            trial_days_remaining,
        }
    }

    /// Fail-closed decision used when nothing better is known.
    pub fn denied() -> Self {
        Self::new(AccessReason::TrialExpired, None, 0, 0)
    }
}

/// Trial window derived from the profile's `trial_started_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialState {
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TrialState {
    pub fn new(started_at: DateTime<Utc>, free_trial_days: i64) -> Self {
        Self {
            started_at,
            expires_at: started_at + Duration::days(free_trial_days),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of the authoritative query: the decision plus the row it was derived from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    pub decision: AccessDecision,
    pub subscription: Option<SubscriptionRecord>,
}

/// Client-side read-through cache entry.
///
/// Replaced wholesale on every successful query, never patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntitlement {
    pub decision: AccessDecision,
    pub subscription: Option<SubscriptionRecord>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedEntitlement {
    pub fn from_snapshot(snapshot: EntitlementSnapshot, fetched_at: DateTime<Utc>) -> Self {
        Self {
            decision: snapshot.decision,
            subscription: snapshot.subscription,
            fetched_at,
        }
    }

    /// Server-side verification timestamp of the cached row, if any.
    pub fn last_verified_at(&self) -> Option<DateTime<Utc>> {
        self.subscription.as_ref().and_then(|s| s.last_verified_at)
    }
}

/// Reason reported by the gating engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    ActiveSubscription,
    CanceledButActive,
    ActiveTrial,
    TrialExpired,
    NotAuthenticated,
}

impl From<AccessReason> for GateReason {
    fn from(reason: AccessReason) -> Self {
        match reason {
            AccessReason::ActiveSubscription => GateReason::ActiveSubscription,
            AccessReason::CanceledButActive => GateReason::CanceledButActive,
            AccessReason::ActiveTrial => GateReason::ActiveTrial,
            AccessReason::TrialExpired => GateReason::TrialExpired,
        }
    }
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateReason::ActiveSubscription => "active_subscription",
            GateReason::CanceledButActive => "canceled_but_active",
            GateReason::ActiveTrial => "active_trial",
            GateReason::TrialExpired => "trial_expired",
            GateReason::NotAuthenticated => "not_authenticated",
        };
        f.write_str(s)
    }
}

/// Answer to "may I record / may I view right now?"
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: GateReason,
}

impl GateDecision {
    pub fn from_decision(decision: &AccessDecision) -> Self {
        Self {
            allowed: decision.can_record,
            reason: decision.reason.into(),
        }
    }

    pub fn not_authenticated() -> Self {
        Self {
            allowed: false,
            reason: GateReason::NotAuthenticated,
        }
    }
}
