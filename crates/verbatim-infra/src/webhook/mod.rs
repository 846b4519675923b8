//! Payment-provider webhook signatures

mod signature;

pub use signature::{sign_payload, verify_signature, SignatureHeader};
