//! Change propagation channel
//!
//! Clients subscribe per user and receive an invalidation signal whenever that
//! user's subscription row changes. Signals carry no row values; the gate
//! re-verifies on its next check.

mod hub;
#[cfg(feature = "realtime-postgres")]
mod postgres;
mod subscription;

pub use hub::ChangeHub;
#[cfg(feature = "realtime-postgres")]
pub use postgres::{PgChangeChannel, PgChangeNotifier};
pub use subscription::{
    ChangeChannel, ChangeSignal, ChangeSubscription, ChannelState, ReconnectPolicy,
};
