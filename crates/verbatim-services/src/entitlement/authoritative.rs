use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use verbatim_core::models::{EntitlementSnapshot, SessionContext};
use verbatim_core::{AccessResolver, AppError, AuthoritativeSource, Clock, EntitlementStore, SystemClock};

/// The authoritative query, run in-process against an [`EntitlementStore`].
///
/// Read-only: loads the subscription row and trial start, then resolves them
/// at the clock's `now`.
#[derive(Clone)]
pub struct StoreAuthoritativeSource {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
    resolver: AccessResolver,
}

impl StoreAuthoritativeSource {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            resolver: AccessResolver::default(),
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

    #[tracing::instrument(skip(self))]
    pub async fn snapshot(&self, user_id: Uuid) -> Result<EntitlementSnapshot, AppError> {
        let subscription = self.store.find_subscription(user_id).await?;
        let trial_started_at = self.store.trial_started_at(user_id).await?;
        let decision =
            self.resolver
                .resolve(subscription.as_ref(), trial_started_at, self.clock.now());

        tracing::debug!(
            %user_id,
            reason = %decision.reason,
            can_record = decision.can_record,
            "Resolved entitlement"
        );

        Ok(EntitlementSnapshot {
            decision,
            subscription,
        })
    }
}

#[async_trait]
impl AuthoritativeSource for StoreAuthoritativeSource {
    async fn fetch(&self, session: &SessionContext) -> Result<EntitlementSnapshot, AppError> {
        self.snapshot(session.user_id).await
    }
}
