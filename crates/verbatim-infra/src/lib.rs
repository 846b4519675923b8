//! Verbatim Infrastructure Library
//!
//! Shared infrastructure used by the entitlement server and clients:
//! - Telemetry initialization
//! - Change propagation channel (in-process hub, Postgres LISTEN/NOTIFY)
//! - Payment-provider webhook signature verification

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod realtime;

#[cfg(feature = "webhook")]
pub mod webhook;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use realtime::{ChangeChannel, ChangeHub, ChangeSignal, ChangeSubscription, ReconnectPolicy};

#[cfg(feature = "realtime-postgres")]
pub use realtime::{PgChangeChannel, PgChangeNotifier};

#[cfg(feature = "webhook")]
pub use webhook::{sign_payload, verify_signature, SignatureHeader};
