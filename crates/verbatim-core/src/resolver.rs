//! Authoritative access resolver.
//!
//! Derives the canonical [`AccessDecision`] from a subscription row, the trial
//! start on the user's profile and an explicit `now`. The resolver never reads
//! the clock itself, so the same inputs always produce the same decision.
//!
//! Priority order, first match wins:
//! 1. status `active` or `trialing` -> `active_subscription`
//! 2. status `canceled` with `current_period_end > now` -> `canceled_but_active`
//! 3. trial still running -> `active_trial`
//! 4. otherwise -> `trial_expired`
//!
//! Billing-issue statuses (`past_due`, `incomplete`, `billing_issue`) match no
//! rule and fall through to the trial check.

use chrono::{DateTime, Utc};

use crate::constants::{FREE_TRIAL_DAYS, MILLIS_PER_DAY};
use crate::models::{AccessDecision, AccessReason, SubscriptionRecord, TrialState};

/// Resolver configured with the free trial length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessResolver {
    free_trial_days: i64,
}

impl Default for AccessResolver {
    fn default() -> Self {
        Self {
            free_trial_days: FREE_TRIAL_DAYS,
        }
    }
}

impl AccessResolver {
    pub fn new(free_trial_days: i64) -> Self {
        Self {
            free_trial_days: free_trial_days.max(0),
        }
    }

    pub fn free_trial_days(&self) -> i64 {
        self.free_trial_days
    }

    pub fn trial(&self, trial_started_at: Option<DateTime<Utc>>) -> Option<TrialState> {
        trial_started_at.map(|started| TrialState::new(started, self.free_trial_days))
    }

    pub fn resolve(
        &self,
        subscription: Option<&SubscriptionRecord>,
        trial_started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        let trial = self.trial(trial_started_at);
        let trial_days_remaining = trial
            .map(|t| days_until(t.expires_at, now))
            .unwrap_or(0);

        if let Some(sub) = subscription {
            if let Err(error) = sub.check_consistency() {
                tracing::warn!(
                    user_id = %sub.user_id,
                    error = %error,
                    "Inconsistent subscription record, denying access"
                );
                return AccessDecision::new(
                    AccessReason::TrialExpired,
                    None,
                    0,
                    trial_days_remaining,
                );
            }

            if sub.status.is_paying() {
                let ends_at = sub.current_period_end;
                return AccessDecision::new(
                    AccessReason::ActiveSubscription,
                    ends_at,
                    ends_at.map(|end| days_until(end, now)).unwrap_or(0),
                    trial_days_remaining,
                );
            }

            if sub.in_grace_window(now) {
                let ends_at = sub.current_period_end;
                return AccessDecision::new(
                    AccessReason::CanceledButActive,
                    ends_at,
                    ends_at.map(|end| days_until(end, now)).unwrap_or(0),
                    trial_days_remaining,
                );
            }
        }

        if let Some(trial) = trial.filter(|t| t.is_active(now)) {
            return AccessDecision::new(
                AccessReason::ActiveTrial,
                Some(trial.expires_at),
                trial_days_remaining,
                trial_days_remaining,
            );
        }

        AccessDecision::new(AccessReason::TrialExpired, None, 0, trial_days_remaining)
    }
}

/// Resolve with the default free trial length.
pub fn resolve(
    subscription: Option<&SubscriptionRecord>,
    trial_started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AccessDecision {
    AccessResolver::default().resolve(subscription, trial_started_at, now)
}

/// Whole days from `now` until `end`, rounded up, never negative.
pub fn days_until(end: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let remaining_ms = (end - now).num_milliseconds();
    if remaining_ms <= 0 {
        return 0;
    }
    let days = (remaining_ms + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
    u32::try_from(days).unwrap_or(u32::MAX)
}
