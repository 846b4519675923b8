//! Client-side gating decision engine.
//!
//! The gate owns the session's cached entitlement and its change subscription.
//! A gated action is answered from the cache only when the cache is fresh, no
//! change event has arrived since it was filled, the change channel is
//! connected, and the cached decision allows access. Everything else goes
//! through a forced verification followed by the authoritative query.
//!
//! A failed verification never touches the cache.

use std::sync::Arc;
use verbatim_core::constants::STATUS_NONE;
use verbatim_core::models::{
    AccessDecision, CachedEntitlement, GateDecision, SessionContext, VerificationResult,
};
use verbatim_core::{
    AppError, AuthoritativeSource, Clock, FreshnessPolicy, SubscriptionVerifier, SystemClock,
};
use verbatim_infra::{ChangeChannel, ChangeSubscription};

pub struct EntitlementGate {
    source: Arc<dyn AuthoritativeSource>,
    verifier: Arc<dyn SubscriptionVerifier>,
    channel: Option<Arc<dyn ChangeChannel>>,
    clock: Arc<dyn Clock>,
    freshness: FreshnessPolicy,
    session: Option<SessionContext>,
    cache: Option<CachedEntitlement>,
    changes: Option<ChangeSubscription>,
    // Set when a change event arrives; cleared only by a successful refetch.
    invalidated: bool,
}

impl EntitlementGate {
    pub fn new(source: Arc<dyn AuthoritativeSource>, verifier: Arc<dyn SubscriptionVerifier>) -> Self {
        Self {
            source,
            verifier,
            channel: None,
            clock: Arc::new(SystemClock),
            freshness: FreshnessPolicy::default(),
            session: None,
            cache: None,
            changes: None,
            invalidated: false,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn ChangeChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    /// Start a session. Any previous session's cache and subscription are
    /// discarded first. If the change channel cannot be opened the gate runs
    /// in degraded mode and verifies on every gated action.
    pub async fn sign_in(&mut self, session: SessionContext) {
        self.sign_out();
        let user_id = session.user_id;
        self.session = Some(session);

        if let Some(channel) = &self.channel {
            match channel.subscribe(user_id).await {
                Ok(subscription) => {
                    tracing::debug!(%user_id, "Change subscription opened");
                    self.changes = Some(subscription);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        %user_id,
                        "Change subscription unavailable, verifying on every check"
                    );
                }
            }
        }
    }

    /// End the session: destroys the cache and closes the change subscription.
    pub fn sign_out(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(user_id = %session.user_id, "Entitlement session closed");
        }
        self.cache = None;
        self.changes = None;
        self.invalidated = false;
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn cached(&self) -> Option<&CachedEntitlement> {
        self.cache.as_ref()
    }

    /// No change subscription, or a disconnected one.
    pub fn is_degraded(&self) -> bool {
        !self
            .changes
            .as_ref()
            .is_some_and(ChangeSubscription::is_connected)
    }

    /// Whether the cache may answer without any I/O. Drains pending change events.
    pub fn is_cache_trusted(&mut self) -> bool {
        if let Some(changes) = self.changes.as_mut() {
            if changes.take_invalidation() {
                self.invalidated = true;
            }
        }
        if self.invalidated || self.is_degraded() {
            return false;
        }
        self.freshness
            .is_entitlement_fresh(self.cache.as_ref(), self.clock.now())
    }

    /// Wait for the next change event or connectivity transition on the
    /// session's subscription. The cache is treated as invalid afterwards.
    pub async fn wait_for_change(&mut self) -> Result<(), AppError> {
        let changes = self.changes.as_mut().ok_or_else(|| {
            AppError::ChannelDisconnected("No change subscription".to_string())
        })?;
        changes.changed().await?;
        self.invalidated = true;
        Ok(())
    }

    /// May the user perform a gated action (record, view gated content) right now?
    ///
    /// Returns `VerificationUnavailable` when the slow path could not reach the
    /// backend; the cache is left exactly as it was.
    #[tracing::instrument(skip(self))]
    pub async fn can_perform_gated_action(&mut self) -> Result<GateDecision, AppError> {
        let Some(session) = self.session.clone() else {
            return Ok(GateDecision::not_authenticated());
        };

        if self.is_cache_trusted() {
            if let Some(cache) = self.cache.as_ref().filter(|c| c.decision.can_record) {
                return Ok(GateDecision::from_decision(&cache.decision));
            }
        }

        match self.verify_and_refresh(&session).await {
            Ok(decision) => Ok(GateDecision::from_decision(&decision)),
            Err(AppError::NotAuthenticated) => Ok(GateDecision::not_authenticated()),
            Err(e) => Err(e),
        }
    }

    pub async fn can_record(&mut self) -> Result<GateDecision, AppError> {
        self.can_perform_gated_action().await
    }

    pub async fn can_view(&mut self) -> Result<GateDecision, AppError> {
        self.can_perform_gated_action().await
    }

    /// Authoritative query only; replaces the cache on success.
    pub async fn refresh(&mut self) -> Result<AccessDecision, AppError> {
        let session = self.session.clone().ok_or(AppError::NotAuthenticated)?;
        self.fetch_into_cache(&session).await
    }

    /// Forced verification followed by a refetch. Errors surface to the caller.
    pub async fn sync(&mut self) -> Result<VerificationResult, AppError> {
        let session = self.session.clone().ok_or(AppError::NotAuthenticated)?;
        let result = require_verified(self.verifier.verify(&session, true).await?)?;
        self.fetch_into_cache(&session).await?;
        Ok(result)
    }

    /// Background verification. Never fails: on error the previous decision's
    /// values come back with `verified: false`.
    pub async fn verify_opportunistic(&mut self) -> VerificationResult {
        let Some(session) = self.session.clone() else {
            return VerificationResult::unverified(STATUS_NONE, None, None, "Not authenticated");
        };

        match self.verifier.verify(&session, false).await {
            Ok(result) => {
                if result.status_changed {
                    self.invalidated = true;
                }
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %session.user_id, "Background verification failed");
                let subscription = self.cache.as_ref().and_then(|c| c.subscription.as_ref());
                VerificationResult::unverified(
                    subscription.map_or(STATUS_NONE, |s| s.status.as_str()),
                    self.cache.as_ref().map(|c| &c.decision),
                    subscription.and_then(|s| s.current_period_end),
                    e.to_string(),
                )
            }
        }
    }

    async fn verify_and_refresh(
        &mut self,
        session: &SessionContext,
    ) -> Result<AccessDecision, AppError> {
        let result = require_verified(self.verifier.verify(session, true).await?)?;
        if result.status_changed {
            tracing::info!(
                user_id = %session.user_id,
                status = %result.status,
                "Subscription status changed during verification"
            );
        }
        self.fetch_into_cache(session).await
    }

    async fn fetch_into_cache(
        &mut self,
        session: &SessionContext,
    ) -> Result<AccessDecision, AppError> {
        let snapshot = self.source.fetch(session).await?;
        let cache = CachedEntitlement::from_snapshot(snapshot, self.clock.now());
        let decision = cache.decision.clone();
        self.cache = Some(cache);
        self.invalidated = false;
        Ok(decision)
    }
}

/// A verifier that answered without reaching the provider counts as unavailable.
fn require_verified(result: VerificationResult) -> Result<VerificationResult, AppError> {
    if result.verified {
        Ok(result)
    } else {
        Err(AppError::VerificationUnavailable(result.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::{ProviderWebhookService, ReconciliationService, StoreAuthoritativeSource};
    use crate::test_helpers::{
        provider_subscription, subscription_record, test_now, CountingSource, ManualClock,
        MemoryEntitlementStore, ScriptedProvider, ScriptedVerifier,
    };
    use chrono::Duration;
    use uuid::Uuid;
    use verbatim_core::models::{
        ChangeKind, ChangeSource, GateReason, SubscriptionChange, SubscriptionStatus,
    };
    use verbatim_infra::{sign_payload, ChangeHub};

    struct Harness {
        store: MemoryEntitlementStore,
        provider: Arc<ScriptedProvider>,
        verifier: Arc<ScriptedVerifier>,
        source: Arc<CountingSource>,
        hub: ChangeHub,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryEntitlementStore::new();
            let provider = Arc::new(ScriptedProvider::new());
            let hub = ChangeHub::default();
            let clock = ManualClock::new(test_now());
            let reconciliation = ReconciliationService::new(
                Arc::new(store.clone()),
                provider.clone(),
                Arc::new(hub.clone()),
            )
            .with_clock(Arc::new(clock.clone()));
            let verifier = Arc::new(ScriptedVerifier::new(Arc::new(reconciliation)));
            let source = Arc::new(CountingSource::new(Arc::new(
                StoreAuthoritativeSource::new(Arc::new(store.clone()))
                    .with_clock(Arc::new(clock.clone())),
            )));
            Self {
                store,
                provider,
                verifier,
                source,
                hub,
                clock,
            }
        }

        fn gate(&self) -> EntitlementGate {
            EntitlementGate::new(self.source.clone(), self.verifier.clone())
                .with_channel(Arc::new(self.hub.clone()))
                .with_clock(Arc::new(self.clock.clone()))
        }

        fn active_user(&self) -> Uuid {
            let user_id = Uuid::new_v4();
            let end = test_now() + Duration::days(20);
            self.store
                .insert_subscription(subscription_record(user_id, SubscriptionStatus::Active, end));
            self.provider
                .put(provider_subscription(user_id, "active", end));
            user_id
        }
    }

    /// Hands out one pre-built subscription.
    struct OneShotChannel(std::sync::Mutex<Option<ChangeSubscription>>);

    impl OneShotChannel {
        fn new(subscription: ChangeSubscription) -> Self {
            Self(std::sync::Mutex::new(Some(subscription)))
        }
    }

    #[async_trait::async_trait]
    impl ChangeChannel for OneShotChannel {
        async fn subscribe(&self, _user_id: Uuid) -> Result<ChangeSubscription, AppError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| AppError::ChannelDisconnected("already taken".to_string()))
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_without_session_fails_closed() {
        let h = Harness::new();
        let mut gate = h.gate();
        let decision = gate.can_perform_gated_action().await.unwrap();
        assert_eq!(decision, GateDecision::not_authenticated());
        assert!(matches!(gate.refresh().await, Err(AppError::NotAuthenticated)));
        assert!(matches!(gate.sync().await, Err(AppError::NotAuthenticated)));
        assert!(!gate.verify_opportunistic().await.verified);
        assert_eq!(h.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_allowed_cache_takes_fast_path() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;

        let first = gate.can_record().await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.reason, GateReason::ActiveSubscription);
        assert_eq!(h.verifier.forced_calls(), 1);
        assert_eq!(h.source.calls(), 1);

        settle().await;
        h.clock.advance(Duration::minutes(1));
        let second = gate.can_view().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(h.verifier.calls(), 1);
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_reverifies() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;

        gate.can_record().await.unwrap();
        settle().await;
        h.clock.advance(Duration::minutes(6));
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 2);
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_denied_cache_always_reverifies() {
        let h = Harness::new();
        let user_id = Uuid::new_v4();
        h.store
            .set_trial_started(user_id, test_now() - Duration::days(8));
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;

        let decision = gate.can_record().await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, GateReason::TrialExpired);

        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_verification_leaves_cache_untouched() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();
        let before = gate.cached().cloned();

        h.clock.advance(Duration::minutes(10));
        h.verifier.set_failing(true);
        let err = gate.can_record().await.unwrap_err();
        assert!(matches!(err, AppError::VerificationUnavailable(_)));
        assert_eq!(gate.cached().cloned(), before);

        assert!(matches!(
            gate.sync().await,
            Err(AppError::VerificationUnavailable(_))
        ));
        assert_eq!(gate.cached().cloned(), before);
    }

    #[tokio::test]
    async fn test_unverified_result_leaves_cache_untouched() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();
        let before = gate.cached().cloned();
        let fetches = h.source.calls();

        h.clock.advance(Duration::minutes(10));
        h.verifier.set_unverified(true);
        let err = gate.can_record().await.unwrap_err();
        assert!(matches!(err, AppError::VerificationUnavailable(_)));
        assert!(matches!(
            gate.sync().await,
            Err(AppError::VerificationUnavailable(_))
        ));
        assert_eq!(gate.cached().cloned(), before);
        assert_eq!(h.source.calls(), fetches);
    }

    #[tokio::test]
    async fn test_channel_dropped_mid_session_reverifies() {
        let h = Harness::new();
        let user_id = h.active_user();
        let (signal, subscription) = ChangeSubscription::detached(user_id, true);
        let channel = Arc::new(OneShotChannel::new(subscription));
        let mut gate = EntitlementGate::new(h.source.clone(), h.verifier.clone())
            .with_channel(channel)
            .with_clock(Arc::new(h.clock.clone()));
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        assert!(!gate.is_degraded());

        gate.can_record().await.unwrap();
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 1);

        drop(signal);
        assert!(gate.is_degraded());

        // Cache is only seconds old, but nothing would announce a change any more.
        h.clock.advance(Duration::seconds(5));
        let decision = gate.can_record().await.unwrap();
        assert!(decision.allowed);
        assert_eq!(h.verifier.forced_calls(), 2);
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_change_wakes_on_event() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();

        h.hub.publish(SubscriptionChange::new(
            user_id,
            ChangeKind::Update,
            ChangeSource::Webhook,
        ));
        tokio::time::timeout(std::time::Duration::from_secs(1), gate.wait_for_change())
            .await
            .expect("change not delivered")
            .unwrap();
        assert!(!gate.is_cache_trusted());

        let mut degraded = EntitlementGate::new(h.source.clone(), h.verifier.clone());
        degraded.sign_in(SessionContext::new(user_id, "token")).await;
        assert!(matches!(
            degraded.wait_for_change().await,
            Err(AppError::ChannelDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_disconnect_then_reconnect() {
        let h = Harness::new();
        let user_id = h.active_user();
        let (signal, subscription) = ChangeSubscription::detached(user_id, true);
        let mut gate = EntitlementGate::new(h.source.clone(), h.verifier.clone())
            .with_channel(Arc::new(OneShotChannel::new(subscription)))
            .with_clock(Arc::new(h.clock.clone()));
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();

        signal.set_connected(false);
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 2);

        // Events may have been missed while away: the reconnect invalidates once.
        signal.set_connected(true);
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 3);
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 3);
    }

    #[tokio::test]
    async fn test_provider_outage_leaves_cache_untouched() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();
        let before = gate.cached().cloned();
        let writes = h.store.write_count();

        h.clock.advance(Duration::minutes(10));
        h.provider.set_failing(true);
        assert!(gate.can_record().await.is_err());
        assert_eq!(gate.cached().cloned(), before);
        assert_eq!(h.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_change_event_forces_reverification() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.can_record().await.unwrap();
        settle().await;
        gate.can_record().await.unwrap();
        let calls = h.verifier.calls();
        assert_eq!(calls, 1);

        // Provider cancels with two days left; the webhook writes the store.
        let end = test_now() + Duration::days(2);
        let mut remote = provider_subscription(user_id, "canceled", end);
        remote.canceled_at = Some(test_now().timestamp());
        h.provider.put(remote.clone());
        let webhook = ProviderWebhookService::new(
            Arc::new(h.store.clone()),
            Arc::new(h.hub.clone()),
            "whsec_test",
        )
        .with_clock(Arc::new(h.clock.clone()));
        let body = serde_json::to_vec(&serde_json::json!({
            "id": "evt_cancel",
            "type": "customer.subscription.updated",
            "data": { "object": remote },
        }))
        .unwrap();
        let signature = sign_payload("whsec_test", test_now().timestamp(), &body).unwrap();
        webhook.handle(&body, Some(signature.as_str())).await.unwrap();
        settle().await;

        // Cache was fetched a moment ago and would otherwise be fresh.
        h.clock.advance(Duration::seconds(30));
        let decision = gate.can_record().await.unwrap();
        assert_eq!(h.verifier.calls(), calls + 1);
        assert!(decision.allowed);
        assert_eq!(decision.reason, GateReason::CanceledButActive);
    }

    #[tokio::test]
    async fn test_without_channel_runs_degraded() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = EntitlementGate::new(h.source.clone(), h.verifier.clone())
            .with_clock(Arc::new(h.clock.clone()));
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        assert!(gate.is_degraded());

        gate.can_record().await.unwrap();
        gate.can_record().await.unwrap();
        assert_eq!(h.verifier.forced_calls(), 2);
    }

    #[tokio::test]
    async fn test_sign_out_destroys_cache_and_subscription() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.refresh().await.unwrap();
        assert!(gate.cached().is_some());
        assert!(!gate.is_degraded());

        gate.sign_out();
        assert!(gate.cached().is_none());
        assert!(gate.session().is_none());
        assert!(gate.is_degraded());
        assert_eq!(
            gate.can_record().await.unwrap(),
            GateDecision::not_authenticated()
        );
    }

    #[tokio::test]
    async fn test_switching_users_discards_previous_cache() {
        let h = Harness::new();
        let first = h.active_user();
        let second = Uuid::new_v4();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(first, "token-a")).await;
        gate.refresh().await.unwrap();

        gate.sign_in(SessionContext::new(second, "token-b")).await;
        assert!(gate.cached().is_none());
        let decision = gate.can_record().await.unwrap();
        assert_eq!(decision.reason, GateReason::TrialExpired);
    }

    #[tokio::test]
    async fn test_opportunistic_failure_reports_previous_decision() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;
        gate.refresh().await.unwrap();
        let before = gate.cached().cloned();

        h.verifier.set_failing(true);
        let result = gate.verify_opportunistic().await;
        assert!(!result.verified);
        assert!(!result.status_changed);
        assert_eq!(result.status, "active");
        assert!(result.can_record);
        assert_eq!(gate.cached().cloned(), before);
    }

    #[tokio::test]
    async fn test_sync_forces_provider_round_trip() {
        let h = Harness::new();
        let user_id = h.active_user();
        let mut gate = h.gate();
        gate.sign_in(SessionContext::new(user_id, "token")).await;

        let result = gate.sync().await.unwrap();
        assert!(result.verified);
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.verifier.forced_calls(), 1);
        assert!(gate.cached().is_some());
    }
}
