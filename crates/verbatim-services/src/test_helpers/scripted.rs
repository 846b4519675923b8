use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use verbatim_core::models::{
    EntitlementSnapshot, SessionContext, SubscriptionChange, VerificationResult,
};
use verbatim_core::{AppError, AuthoritativeSource, ChangeNotifier, SubscriptionVerifier};

use crate::provider::{PaymentProvider, ProviderSubscription};

/// Payment provider serving canned subscription objects
#[derive(Default)]
pub struct ScriptedProvider {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, subscription: ProviderSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    /// Fail every call with a provider error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Never answer, to exercise timeouts
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::PaymentProvider("scripted outage".to_string()));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| AppError::PaymentProvider(format!("No such subscription: {}", subscription_id)))
    }
}

/// Verifier wrapper that counts calls and can simulate outages
pub struct ScriptedVerifier {
    inner: Arc<dyn SubscriptionVerifier>,
    failing: AtomicBool,
    unverified: AtomicBool,
    calls: AtomicUsize,
    forced_calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new(inner: Arc<dyn SubscriptionVerifier>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            unverified: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            forced_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer `Ok` with `verified: false`, as a backend that swallowed the outage would.
    pub fn set_unverified(&self, unverified: bool) {
        self.unverified.store(unverified, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn forced_calls(&self) -> usize {
        self.forced_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionVerifier for ScriptedVerifier {
    async fn verify(
        &self,
        session: &SessionContext,
        force_refresh: bool,
    ) -> Result<VerificationResult, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if force_refresh {
            self.forced_calls.fetch_add(1, Ordering::SeqCst);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::VerificationUnavailable(
                "scripted network failure".to_string(),
            ));
        }
        if self.unverified.load(Ordering::SeqCst) {
            return Ok(VerificationResult::unverified(
                "active",
                None,
                None,
                "scripted provider timeout",
            ));
        }
        self.inner.verify(session, force_refresh).await
    }
}

/// Authoritative source wrapper that counts fetches
pub struct CountingSource {
    inner: Arc<dyn AuthoritativeSource>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn AuthoritativeSource>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthoritativeSource for CountingSource {
    async fn fetch(&self, session: &SessionContext) -> Result<EntitlementSnapshot, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::VerificationUnavailable(
                "scripted network failure".to_string(),
            ));
        }
        self.inner.fetch(session).await
    }
}

/// Change notifier that records what it was asked to publish
#[derive(Default)]
pub struct RecordingNotifier {
    changes: Mutex<Vec<SubscriptionChange>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<SubscriptionChange> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn notify(&self, change: SubscriptionChange) -> Result<(), AppError> {
        self.changes.lock().unwrap().push(change);
        Ok(())
    }
}
