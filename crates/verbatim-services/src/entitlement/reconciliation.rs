use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use verbatim_core::constants::{STATUS_NONE, VERIFIER_TIMEOUT_SECS};
use verbatim_core::models::{
    AccessDecision, ChangeKind, ChangeSource, SessionContext, SubscriptionChange,
    SubscriptionRecord, VerificationResult,
};
use verbatim_core::{
    AccessResolver, AppError, ChangeNotifier, Clock, EntitlementStore, FreshnessPolicy,
    SubscriptionVerifier, SystemClock,
};

use crate::provider::PaymentProvider;

/// Server side of subscription verification.
///
/// Re-reads the provider's subscription object, writes any difference back to
/// the store with a fresh `last_verified_at`, and publishes a change when
/// something the resolver reads moved. A provider failure writes nothing.
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn EntitlementStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
    resolver: AccessResolver,
    freshness: FreshnessPolicy,
    timeout: Duration,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            clock: Arc::new(SystemClock),
            resolver: AccessResolver::default(),
            freshness: FreshnessPolicy::default(),
            timeout: Duration::from_secs(VERIFIER_TIMEOUT_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resolver(mut self, resolver: AccessResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile(
        &self,
        user_id: Uuid,
        force_refresh: bool,
    ) -> Result<VerificationResult, AppError> {
        let record = self.store.find_subscription(user_id).await?;
        let trial_started_at = self.store.trial_started_at(user_id).await?;
        let now = self.clock.now();

        let (stored, provider_subscription_id) = match record {
            Some(stored) => match stored.provider_subscription_id.clone() {
                Some(id) => (stored, id),
                None => {
                    let decision = self.resolver.resolve(Some(&stored), trial_started_at, now);
                    return Ok(verification_result(
                        STATUS_NONE,
                        false,
                        &decision,
                        stored.current_period_end,
                        "No provider subscription to verify",
                    ));
                }
            },
            None => {
                let decision = self.resolver.resolve(None, trial_started_at, now);
                return Ok(verification_result(
                    STATUS_NONE,
                    false,
                    &decision,
                    None,
                    "No subscription on record",
                ));
            }
        };

        if !force_refresh && self.freshness.is_fresh(stored.last_verified_at, now) {
            tracing::debug!(%user_id, "Recently verified, skipping provider call");
            let decision = self.resolver.resolve(Some(&stored), trial_started_at, now);
            return Ok(verification_result(
                stored.status.as_str(),
                false,
                &decision,
                stored.current_period_end,
                "Recently verified",
            ));
        }

        let remote = match tokio::time::timeout(
            self.timeout,
            self.provider.fetch_subscription(&provider_subscription_id),
        )
        .await
        {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, %user_id, "Payment provider lookup failed");
                return Err(AppError::VerificationUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    %user_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Payment provider lookup timed out"
                );
                return Err(AppError::VerificationUnavailable(format!(
                    "Payment provider did not answer within {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let update = remote.to_update();
        let status_changed = stored.status != update.status;
        let mut next = stored.clone();
        let material = next.apply(&update);

        let persisted = if next == stored {
            self.store.touch_verified(user_id, now).await?;
            SubscriptionRecord {
                last_verified_at: Some(now),
                ..stored.clone()
            }
        } else {
            self.store
                .upsert_subscription(user_id, &update, Some(now))
                .await?
        };

        if status_changed {
            tracing::info!(
                %user_id,
                from = %stored.status,
                to = %persisted.status,
                "Subscription status changed at payment provider"
            );
        }

        if material {
            self.publish(user_id).await;
        }

        let decision = self.resolver.resolve(Some(&persisted), trial_started_at, now);
        let message = if status_changed {
            format!(
                "Subscription status updated from {} to {}",
                stored.status, persisted.status
            )
        } else {
            "Subscription verified".to_string()
        };

        Ok(verification_result(
            persisted.status.as_str(),
            status_changed,
            &decision,
            persisted.current_period_end,
            message,
        ))
    }

    async fn publish(&self, user_id: Uuid) {
        let change = SubscriptionChange::new(user_id, ChangeKind::Update, ChangeSource::Verifier);
        if let Err(e) = self.notifier.notify(change).await {
            tracing::warn!(error = %e, %user_id, "Failed to publish subscription change");
        }
    }
}

fn verification_result(
    status: &str,
    status_changed: bool,
    decision: &AccessDecision,
    current_period_end: Option<DateTime<Utc>>,
    message: impl Into<String>,
) -> VerificationResult {
    VerificationResult {
        verified: true,
        status: status.to_string(),
        status_changed,
        can_record: decision.can_record,
        can_access_features: decision.can_access_features,
        current_period_end,
        message: message.into(),
    }
}

#[async_trait]
impl SubscriptionVerifier for ReconciliationService {
    async fn verify(
        &self,
        session: &SessionContext,
        force_refresh: bool,
    ) -> Result<VerificationResult, AppError> {
        self.reconcile(session.user_id, force_refresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        provider_subscription, subscription_record, test_now, ManualClock,
        MemoryEntitlementStore, RecordingNotifier, ScriptedProvider,
    };
    use chrono::Duration as ChronoDuration;
    use verbatim_core::models::SubscriptionStatus;

    struct Harness {
        store: MemoryEntitlementStore,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<RecordingNotifier>,
        clock: ManualClock,
        service: ReconciliationService,
    }

    fn harness() -> Harness {
        let store = MemoryEntitlementStore::new();
        let provider = Arc::new(ScriptedProvider::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = ManualClock::new(test_now());
        let service = ReconciliationService::new(
            Arc::new(store.clone()),
            provider.clone(),
            notifier.clone(),
        )
        .with_clock(Arc::new(clock.clone()));
        Harness {
            store,
            provider,
            notifier,
            clock,
            service,
        }
    }

    #[tokio::test]
    async fn test_no_subscription_skips_provider() {
        let h = harness();
        let user_id = Uuid::new_v4();
        h.store.set_trial_started(user_id, test_now() - ChronoDuration::days(2));

        let result = h.service.reconcile(user_id, true).await.unwrap();
        assert!(result.verified);
        assert_eq!(result.status, "none");
        assert!(!result.status_changed);
        assert!(result.can_record);
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_record_without_provider_id_skips_provider() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let mut record = subscription_record(
            user_id,
            SubscriptionStatus::Active,
            test_now() + ChronoDuration::days(10),
        );
        record.provider_subscription_id = None;
        h.store.insert_subscription(record);

        let result = h.service.reconcile(user_id, true).await.unwrap();
        assert_eq!(result.status, "none");
        assert!(result.can_record);
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_verification_short_circuits_unless_forced() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let end = test_now() + ChronoDuration::days(10);
        let mut record = subscription_record(user_id, SubscriptionStatus::Active, end);
        record.last_verified_at = Some(test_now() - ChronoDuration::minutes(1));
        h.store.insert_subscription(record);
        h.provider.put(provider_subscription(user_id, "active", end));

        let result = h.service.reconcile(user_id, false).await.unwrap();
        assert_eq!(result.status, "active");
        assert_eq!(h.provider.calls(), 0);

        h.service.reconcile(user_id, true).await.unwrap();
        assert_eq!(h.provider.calls(), 1);

        h.clock.advance(ChronoDuration::minutes(10));
        h.service.reconcile(user_id, false).await.unwrap();
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_status_change_is_written_and_published() {
        let h = harness();
        let user_id = Uuid::new_v4();
        h.store.insert_subscription(subscription_record(
            user_id,
            SubscriptionStatus::Active,
            test_now() + ChronoDuration::days(2),
        ));
        let mut remote =
            provider_subscription(user_id, "canceled", test_now() + ChronoDuration::days(2));
        remote.canceled_at = Some(test_now().timestamp());
        h.provider.put(remote);

        let result = h.service.reconcile(user_id, true).await.unwrap();
        assert!(result.verified);
        assert!(result.status_changed);
        assert_eq!(result.status, "canceled");
        // Grace window: canceled but paid through period end
        assert!(result.can_record);

        let stored = h.store.subscription(user_id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
        assert_eq!(stored.last_verified_at, Some(test_now()));

        let changes = h.notifier.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].user_id, user_id);
        assert_eq!(changes[0].source, ChangeSource::Verifier);
    }

    #[tokio::test]
    async fn test_repeated_verification_is_idempotent() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let end = test_now() + ChronoDuration::days(20);
        h.store.insert_subscription(subscription_record(
            user_id,
            SubscriptionStatus::PastDue,
            end,
        ));
        h.provider.put(provider_subscription(user_id, "active", end));

        let first = h.service.reconcile(user_id, true).await.unwrap();
        assert!(first.status_changed);

        h.clock.advance(ChronoDuration::seconds(1));
        let second = h.service.reconcile(user_id, true).await.unwrap();
        assert!(!second.status_changed);
        assert_eq!(second.can_record, first.can_record);
        assert_eq!(second.status, first.status);
        assert_eq!(second.current_period_end, first.current_period_end);
        assert_eq!(h.notifier.changes().len(), 1);

        let stored = h.store.subscription(user_id).unwrap();
        assert_eq!(
            stored.last_verified_at,
            Some(test_now() + ChronoDuration::seconds(1))
        );
    }

    #[tokio::test]
    async fn test_provider_failure_writes_nothing() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let record = subscription_record(
            user_id,
            SubscriptionStatus::Active,
            test_now() + ChronoDuration::days(5),
        );
        h.store.insert_subscription(record.clone());
        h.provider.set_failing(true);

        let err = h.service.reconcile(user_id, true).await.unwrap_err();
        assert!(matches!(err, AppError::VerificationUnavailable(_)));
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(h.store.subscription(user_id), Some(record));
        assert!(h.notifier.changes().is_empty());
    }

    #[tokio::test]
    async fn test_provider_timeout_is_unavailable() {
        let h = harness();
        let user_id = Uuid::new_v4();
        h.store.insert_subscription(subscription_record(
            user_id,
            SubscriptionStatus::Active,
            test_now() + ChronoDuration::days(5),
        ));
        h.provider.set_hanging(true);

        let service = h.service.clone().with_timeout(Duration::from_millis(20));
        let err = service.reconcile(user_id, true).await.unwrap_err();
        assert!(matches!(err, AppError::VerificationUnavailable(_)));
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_billing_issue_from_provider_denies_access() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let end = test_now() + ChronoDuration::days(12);
        h.store.insert_subscription(subscription_record(
            user_id,
            SubscriptionStatus::Active,
            end,
        ));
        h.provider.put(provider_subscription(user_id, "unpaid", end));

        let session = SessionContext::new(user_id, "token");
        let result = h.service.verify(&session, true).await.unwrap();
        assert_eq!(result.status, "billing_issue");
        assert!(result.status_changed);
        assert!(!result.can_record);
    }
}
