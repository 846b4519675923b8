use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row operation that produced a change notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Writer that touched the subscription row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Webhook,
    Verifier,
}

/// Notification that a user's subscription row changed.
///
/// Consumers act on the fact of change only; no row values travel with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub user_id: Uuid,
    pub kind: ChangeKind,
    pub source: ChangeSource,
    pub occurred_at: DateTime<Utc>,
}

impl SubscriptionChange {
    pub fn new(user_id: Uuid, kind: ChangeKind, source: ChangeSource) -> Self {
        Self {
            user_id,
            kind,
            source,
            occurred_at: Utc::now(),
        }
    }
}
