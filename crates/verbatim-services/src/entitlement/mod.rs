mod authoritative;
mod gate;
mod reconciliation;
mod webhook;

pub use authoritative::StoreAuthoritativeSource;
pub use gate::EntitlementGate;
pub use reconciliation::ReconciliationService;
pub use webhook::{ProviderWebhookService, WebhookOutcome};
