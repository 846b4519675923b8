//! Test helpers for entitlement services
//!
//! In-memory implementations of the core collaborator traits and fixtures,
//! so the gate, reconciliation and webhook paths can be exercised without a
//! database, payment provider or network.

pub mod clock;
pub mod fixtures;
pub mod memory_store;
pub mod scripted;

pub use clock::ManualClock;
pub use fixtures::*;
pub use memory_store::MemoryEntitlementStore;
pub use scripted::{CountingSource, RecordingNotifier, ScriptedProvider, ScriptedVerifier};
