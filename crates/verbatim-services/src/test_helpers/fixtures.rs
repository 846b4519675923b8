use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;
use verbatim_core::models::{SubscriptionRecord, SubscriptionStatus};

use crate::provider::ProviderSubscription;

/// Fixed reference instant used across tests
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 10, 0, 0).unwrap()
}

/// Stored subscription linked to provider ids `sub_<n>` / `cus_<n>`
pub fn subscription_record(
    user_id: Uuid,
    status: SubscriptionStatus,
    period_end: DateTime<Utc>,
) -> SubscriptionRecord {
    let suffix = user_id.simple().to_string();
    SubscriptionRecord {
        id: Uuid::new_v4(),
        user_id,
        status,
        provider_customer_id: Some(format!("cus_{}", suffix)),
        provider_subscription_id: Some(format!("sub_{}", suffix)),
        current_period_start: Some(period_end - Duration::days(30)),
        current_period_end: Some(period_end),
        canceled_at: None,
        cancellation_reason: None,
        last_verified_at: None,
        created_at: period_end - Duration::days(60),
        updated_at: period_end - Duration::days(30),
    }
}

/// Provider object matching [`subscription_record`]'s ids
pub fn provider_subscription(
    user_id: Uuid,
    status: &str,
    period_end: DateTime<Utc>,
) -> ProviderSubscription {
    let suffix = user_id.simple().to_string();
    ProviderSubscription {
        id: format!("sub_{}", suffix),
        customer: format!("cus_{}", suffix),
        status: status.to_string(),
        current_period_start: Some((period_end - Duration::days(30)).timestamp()),
        current_period_end: Some(period_end.timestamp()),
        canceled_at: None,
        cancellation_details: None,
    }
}
