use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use verbatim_core::models::{SubscriptionRecord, SubscriptionUpdate};
use verbatim_core::{AppError, EntitlementStore};

/// In-memory entitlement store for testing without a database
#[derive(Clone, Default)]
pub struct MemoryEntitlementStore {
    subscriptions: Arc<Mutex<HashMap<Uuid, SubscriptionRecord>>>,
    trials: Arc<Mutex<HashMap<Uuid, DateTime<Utc>>>>,
    customers: Arc<Mutex<HashMap<String, Uuid>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&self, record: SubscriptionRecord) {
        if let Some(customer) = &record.provider_customer_id {
            self.link_customer(customer, record.user_id);
        }
        self.subscriptions
            .lock()
            .unwrap()
            .insert(record.user_id, record);
    }

    pub fn set_trial_started(&self, user_id: Uuid, started_at: DateTime<Utc>) {
        self.trials.lock().unwrap().insert(user_id, started_at);
    }

    pub fn link_customer(&self, customer_id: &str, user_id: Uuid) {
        self.customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), user_id);
    }

    pub fn subscription(&self, user_id: Uuid) -> Option<SubscriptionRecord> {
        self.subscriptions.lock().unwrap().get(&user_id).cloned()
    }

    /// Number of upserts and verification touches so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn find_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        Ok(self.subscription(user_id))
    }

    async fn find_by_provider_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, AppError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .find(|r| r.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn find_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .get(provider_customer_id)
            .copied())
    }

    async fn trial_started_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.trials.lock().unwrap().get(&user_id).copied())
    }

    async fn upsert_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<SubscriptionRecord, AppError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let record = subscriptions
            .entry(user_id)
            .or_insert_with(|| SubscriptionRecord {
                id: Uuid::new_v4(),
                user_id,
                status: update.status,
                provider_customer_id: None,
                provider_subscription_id: None,
                current_period_start: None,
                current_period_end: None,
                canceled_at: None,
                cancellation_reason: None,
                last_verified_at: None,
                created_at: now,
                updated_at: now,
            });
        record.apply(update);
        if verified_at.is_some() {
            record.last_verified_at = verified_at;
        }
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn touch_verified(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.subscriptions.lock().unwrap().get_mut(&user_id) {
            Some(record) => {
                record.last_verified_at = Some(verified_at);
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "No subscription for user {}",
                user_id
            ))),
        }
    }
}
