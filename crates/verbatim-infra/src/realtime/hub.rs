use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;
use verbatim_core::models::SubscriptionChange;
use verbatim_core::{AppError, ChangeNotifier};

use super::subscription::{ChangeChannel, ChangeSubscription};

const DEFAULT_CAPACITY: usize = 256;

/// In-process change channel.
///
/// Used when writers and subscribers share a process, and as the channel in tests.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<SubscriptionChange>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change; returns how many listeners saw it.
    pub fn publish(&self, change: SubscriptionChange) -> usize {
        self.tx.send(change).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ChangeNotifier for ChangeHub {
    async fn notify(&self, change: SubscriptionChange) -> Result<(), AppError> {
        let delivered = self.publish(change);
        tracing::debug!(listeners = delivered, "Published subscription change");
        Ok(())
    }
}

#[async_trait]
impl ChangeChannel for ChangeHub {
    async fn subscribe(&self, user_id: Uuid) -> Result<ChangeSubscription, AppError> {
        let mut rx = self.tx.subscribe();

        Ok(ChangeSubscription::spawn(user_id, true, move |signal| async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(change) if change.user_id == user_id => signal.changed(),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(%user_id, skipped, "Change listener lagged, invalidating");
                            signal.changed();
                        }
                        Err(RecvError::Closed) => {
                            signal.set_connected(false);
                            break;
                        }
                    },
                    _ = signal.closed() => break,
                }
            }
        }))
    }
}
