//! Verbatim Services Layer
//!
//! Entitlement orchestration on top of the core: the client-side gate with its
//! cache and change subscription, the server-side authoritative query,
//! reconciliation against the payment provider and the provider webhook
//! writer. HTTP handling stays in verbatim-api.

pub mod entitlement;
pub mod provider;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use entitlement::{
    EntitlementGate, ProviderWebhookService, ReconciliationService, StoreAuthoritativeSource,
    WebhookOutcome,
};
pub use provider::{map_provider_status, PaymentProvider, ProviderSubscription};
#[cfg(feature = "provider-stripe")]
pub use provider::StripeProvider;
