//! Verbatim Database Layer
//!
//! Repositories for the entitlement record store: subscription rows and the
//! trial start recorded on each user's profile.

pub mod db;

pub use db::{connect, run_migrations, SubscriptionRepository};
