pub mod changes;
pub mod entitlements;
pub mod health;
pub mod verify;
pub mod webhooks;
