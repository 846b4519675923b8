use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::entitlement::AccessDecision;

/// Body of `POST /verify-subscription`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    #[serde(default)]
    pub force_refresh: bool,
}

/// Outcome of a reconciliation round trip against the payment provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    pub status: String,
    pub status_changed: bool,
    pub can_record: bool,
    pub can_access_features: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub message: String,
}

impl VerificationResult {
    /// Report for a verification that could not run. Mirrors the previous
    /// decision so nothing is granted or revoked.
    pub fn unverified(
        status: impl Into<String>,
        previous: Option<&AccessDecision>,
        current_period_end: Option<DateTime<Utc>>,
        message: impl Into<String>,
    ) -> Self {
        let allowed = previous.is_some_and(|d| d.can_record);
        Self {
            verified: false,
            status: status.into(),
            status_changed: false,
            can_record: allowed,
            can_access_features: allowed,
            current_period_end,
            message: message.into(),
        }
    }
}
