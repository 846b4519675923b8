//! Shared pieces of the `verbatim` command-line client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use verbatim_api_client::{ApiClient, HttpAuthoritativeSource, HttpChangeChannel, HttpVerifier};
use verbatim_core::models::{AccessDecision, CachedEntitlement, GateDecision, SessionContext};
use verbatim_services::EntitlementGate;

/// Exit code for a denied gate check, so scripts can branch on it.
pub const EXIT_DENIED: i32 = 2;

/// Initialize tracing for the CLI. Logs go to stderr so stdout stays JSON.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

/// Gate talking to the API over HTTP, invalidated by the API's change stream.
/// If the stream cannot be opened the gate verifies on every check.
pub async fn signed_in_gate(client: ApiClient, session: SessionContext) -> EntitlementGate {
    let channel = HttpChangeChannel::new(client.clone(), session.access_token.clone());
    let mut gate = EntitlementGate::new(
        Arc::new(HttpAuthoritativeSource::new(client.clone())),
        Arc::new(HttpVerifier::new(client)),
    )
    .with_channel(Arc::new(channel));
    gate.sign_in(session).await;
    gate
}

/// `verbatim status` output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub decision: AccessDecision,
    pub subscription_status: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl From<&CachedEntitlement> for StatusReport {
    fn from(cached: &CachedEntitlement) -> Self {
        Self {
            decision: cached.decision.clone(),
            subscription_status: cached
                .subscription
                .as_ref()
                .map(|s| s.status.as_str().to_string()),
            last_verified_at: cached.last_verified_at(),
            fetched_at: cached.fetched_at,
        }
    }
}

pub fn exit_code(decision: &GateDecision) -> i32 {
    if decision.allowed {
        0
    } else {
        EXIT_DENIED
    }
}
