use chrono::Duration;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use verbatim_core::constants::WEBHOOK_TOLERANCE_SECS;
use verbatim_core::models::{
    CancellationReason, ChangeKind, ChangeSource, SubscriptionChange, SubscriptionStatus,
};
use verbatim_core::{AppError, ChangeNotifier, Clock, EntitlementStore, SystemClock};
use verbatim_infra::verify_signature;

use crate::provider::ProviderSubscription;

const SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

#[derive(Debug, Deserialize)]
struct ProviderEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: ProviderEventData,
}

#[derive(Debug, Deserialize)]
struct ProviderEventData {
    object: serde_json::Value,
}

/// What a delivered webhook did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        user_id: Uuid,
        status: SubscriptionStatus,
    },
    UnknownCustomer {
        customer_id: String,
    },
    Ignored {
        event_type: String,
    },
}

/// Writes provider subscription events into the entitlement store
#[derive(Clone)]
pub struct ProviderWebhookService {
    store: Arc<dyn EntitlementStore>,
    notifier: Arc<dyn ChangeNotifier>,
    signing_secret: String,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl ProviderWebhookService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        notifier: Arc<dyn ChangeNotifier>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            signing_secret: signing_secret.into(),
            tolerance: Duration::seconds(WEBHOOK_TOLERANCE_SECS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify and apply one delivery. `signature` is the raw signature header.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let signature = signature
            .ok_or_else(|| AppError::Unauthorized("Missing webhook signature".to_string()))?;
        verify_signature(
            &self.signing_secret,
            signature,
            payload,
            self.tolerance,
            self.clock.now(),
        )?;

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::InvalidInput(format!("Invalid webhook body: {}", e)))?;

        self.apply(event).await
    }

    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    async fn apply(&self, event: ProviderEvent) -> Result<WebhookOutcome, AppError> {
        let deleted = match event.event_type.as_str() {
            SUBSCRIPTION_CREATED | SUBSCRIPTION_UPDATED => false,
            SUBSCRIPTION_DELETED => true,
            other => {
                tracing::debug!("Ignoring webhook event type");
                return Ok(WebhookOutcome::Ignored {
                    event_type: other.to_string(),
                });
            }
        };

        let subscription: ProviderSubscription = serde_json::from_value(event.data.object)
            .map_err(|e| AppError::InvalidInput(format!("Invalid subscription object: {}", e)))?;

        let existing = self
            .store
            .find_by_provider_subscription(&subscription.id)
            .await?;
        let user_id = match &existing {
            Some(record) => record.user_id,
            None => match self
                .store
                .find_user_by_provider_customer(&subscription.customer)
                .await?
            {
                Some(user_id) => user_id,
                None => {
                    tracing::info!(
                        customer_id = %subscription.customer,
                        "Webhook for unknown customer, ignoring"
                    );
                    return Ok(WebhookOutcome::UnknownCustomer {
                        customer_id: subscription.customer,
                    });
                }
            },
        };

        let mut update = subscription.to_update();
        if deleted {
            update.status = SubscriptionStatus::Canceled;
            update.canceled_at = update.canceled_at.or(Some(self.clock.now()));
            update.cancellation_reason = update.cancellation_reason.or_else(|| {
                subscription
                    .cancellation_details
                    .as_ref()
                    .and_then(|d| d.reason.as_deref())
                    .map(CancellationReason::from_provider)
            });
        }

        let record = self.store.upsert_subscription(user_id, &update, None).await?;

        tracing::info!(
            %user_id,
            status = %record.status,
            "Applied provider subscription event"
        );

        let kind = if deleted {
            ChangeKind::Delete
        } else if existing.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        let change = SubscriptionChange::new(user_id, kind, ChangeSource::Webhook);
        if let Err(e) = self.notifier.notify(change).await {
            tracing::warn!(error = %e, %user_id, "Failed to publish subscription change");
        }

        Ok(WebhookOutcome::Applied {
            user_id,
            status: record.status,
        })
    }
}
