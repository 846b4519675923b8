//! Verbatim API Library
//!
//! HTTP surface of the entitlement core: the authoritative query, the
//! verification endpoint, the payment-provider webhook and health checks.

mod api_doc;
mod handlers;

pub mod auth;
pub mod error;
pub mod setup;
pub mod state;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use handlers::webhooks::SIGNATURE_HEADER;
