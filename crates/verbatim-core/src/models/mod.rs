//! Data models for the entitlement domain
//!
//! Each sub-module represents one concern: stored subscription rows, derived
//! access decisions, verification results, change notifications and sessions.

mod change;
mod entitlement;
mod session;
mod subscription;
mod verification;

// Re-export all models for convenient imports
pub use change::*;
pub use entitlement::*;
pub use session::*;
pub use subscription::*;
pub use verification::*;
