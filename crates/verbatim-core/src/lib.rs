//! Verbatim Core Library
//!
//! This crate provides the entitlement domain shared by every Verbatim component:
//! subscription and access models, the authoritative access resolver, the
//! freshness policy, collaborator traits, error types and configuration.
//!
//! Nothing in this crate performs I/O on its own. Stores, verifiers and change
//! channels are plugged in through the traits in [`hooks`].

pub mod config;
pub mod constants;
pub mod error;
pub mod freshness;
pub mod hooks;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use freshness::FreshnessPolicy;
pub use hooks::{
    AuthoritativeSource, ChangeNotifier, Clock, EntitlementStore, NoOpChangeNotifier,
    SubscriptionVerifier, SystemClock,
};
pub use resolver::{resolve, AccessResolver};
