//! Freshness policy for cached access decisions.
//!
//! A decision is fresh only while `now - reference < threshold`, where the
//! reference is the later of the local fetch time and the record's server-side
//! `last_verified_at`. No cached decision is always stale.

use chrono::{DateTime, Duration, Utc};

use crate::constants::FRESHNESS_THRESHOLD_SECS;
use crate::models::CachedEntitlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    threshold: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::seconds(FRESHNESS_THRESHOLD_SECS),
        }
    }
}

impl FreshnessPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_fresh(&self, cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match cached_at {
            // A timestamp from the future is clamped to now.
            Some(at) => now - at.min(now) < self.threshold,
            None => false,
        }
    }

    /// Later of the two timestamps; the server's verification time supersedes
    /// the local fetch time when it is newer.
    pub fn reference_time(
        cached_at: Option<DateTime<Utc>>,
        last_verified_at: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match (cached_at, last_verified_at) {
            (Some(c), Some(v)) => Some(c.max(v)),
            (c, v) => c.or(v),
        }
    }

    pub fn is_entitlement_fresh(
        &self,
        cached: Option<&CachedEntitlement>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(cached) = cached else {
            return false;
        };
        let reference = Self::reference_time(Some(cached.fetched_at), cached.last_verified_at());
        self.is_fresh(reference, now)
    }
}
