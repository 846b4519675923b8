use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;
use verbatim_core::AppError;

/// Subscriber-side view of a change channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    /// Bumped on every invalidation
    pub generation: u64,
    pub connected: bool,
}

/// Producer handle held by the task feeding a [`ChangeSubscription`]
pub struct ChangeSignal {
    tx: watch::Sender<ChannelState>,
}

impl ChangeSignal {
    /// Mark the subscriber's cached decision as invalid.
    pub fn changed(&self) {
        self.tx.send_modify(|state| {
            state.generation = state.generation.wrapping_add(1);
        });
    }

    /// Record a connectivity transition. Reconnecting also invalidates,
    /// since events may have been missed while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|state| {
            if state.connected == connected {
                return false;
            }
            state.connected = connected;
            if connected {
                state.generation = state.generation.wrapping_add(1);
            }
            true
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the subscription has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// A live per-user subscription to the change channel.
///
/// Dropping it stops the background listener.
pub struct ChangeSubscription {
    user_id: Uuid,
    rx: watch::Receiver<ChannelState>,
    task: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    /// Spawn `run` as the listener feeding this subscription.
    pub fn spawn<F, Fut>(user_id: Uuid, connected: bool, run: F) -> Self
    where
        F: FnOnce(ChangeSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (signal, mut subscription) = Self::detached(user_id, connected);
        subscription.task = Some(tokio::spawn(run(signal)));
        subscription
    }

    /// Subscription driven by hand through the returned signal.
    pub fn detached(user_id: Uuid, connected: bool) -> (ChangeSignal, Self) {
        let (tx, rx) = watch::channel(ChannelState {
            generation: 0,
            connected,
        });
        (
            ChangeSignal { tx },
            Self {
                user_id,
                rx,
                task: None,
            },
        )
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Consume a pending invalidation, if any. A channel whose producer is
    /// gone always reports one.
    pub fn take_invalidation(&mut self) -> bool {
        match self.rx.has_changed() {
            Ok(true) => {
                self.rx.borrow_and_update();
                true
            }
            Ok(false) => false,
            Err(_) => true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.rx.has_changed().is_ok() && self.rx.borrow().connected
    }

    pub fn state(&self) -> ChannelState {
        *self.rx.borrow()
    }

    /// Wait for the next invalidation or connectivity change.
    pub async fn changed(&mut self) -> Result<(), AppError> {
        self.rx.changed().await.map_err(|_| {
            AppError::ChannelDisconnected("Change listener stopped".to_string())
        })
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("user_id", &self.user_id)
            .field("state", &*self.rx.borrow())
            .finish()
    }
}

/// Subscriber side of the change propagation channel
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    /// Open a subscription filtered to `user_id`. An error means the caller
    /// should run without realtime invalidation.
    async fn subscribe(&self, user_id: Uuid) -> Result<ChangeSubscription, AppError>;
}

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
