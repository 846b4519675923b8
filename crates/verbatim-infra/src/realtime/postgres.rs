use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use uuid::Uuid;
use verbatim_core::models::SubscriptionChange;
use verbatim_core::{AppError, ChangeNotifier};

use super::subscription::{ChangeChannel, ChangeSignal, ChangeSubscription, ReconnectPolicy};

/// Change channel over Postgres `LISTEN`/`NOTIFY`.
///
/// Each subscription holds its own listener connection and reconnects with
/// backoff. While disconnected the subscription reports `is_connected() == false`.
#[derive(Clone)]
pub struct PgChangeChannel {
    pool: PgPool,
    channel: String,
    reconnect: ReconnectPolicy,
}

impl PgChangeChannel {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    async fn connect(pool: &PgPool, channel: &str) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(channel).await?;
        Ok(listener)
    }

    async fn listen_loop(
        pool: PgPool,
        channel: String,
        reconnect: ReconnectPolicy,
        user_id: Uuid,
        mut listener: Option<PgListener>,
        signal: ChangeSignal,
    ) {
        let mut attempt: u32 = 0;

        loop {
            let mut active = match listener.take() {
                Some(active) => active,
                None => match Self::connect(&pool, &channel).await {
                    Ok(active) => {
                        tracing::info!(%user_id, channel = %channel, "Change listener reconnected");
                        attempt = 0;
                        signal.set_connected(true);
                        active
                    }
                    Err(e) => {
                        let delay = reconnect.delay(attempt);
                        attempt = attempt.saturating_add(1);
                        tracing::warn!(
                            error = %e,
                            %user_id,
                            retry_in_ms = delay.as_millis() as u64,
                            "Change listener connect failed, will retry"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = signal.closed() => return,
                        }
                    }
                },
            };

            loop {
                tokio::select! {
                    received = active.try_recv() => match received {
                        Ok(Some(notification)) => {
                            if affects_user(notification.payload(), user_id) {
                                signal.changed();
                            }
                        }
                        Ok(None) => {
                            tracing::warn!(%user_id, "Change listener connection lost");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, %user_id, "Change listener receive failed");
                            break;
                        }
                    },
                    _ = signal.closed() => return,
                }
            }

            signal.set_connected(false);
        }
    }
}

#[async_trait]
impl ChangeChannel for PgChangeChannel {
    #[tracing::instrument(skip(self), fields(channel = %self.channel))]
    async fn subscribe(&self, user_id: Uuid) -> Result<ChangeSubscription, AppError> {
        let listener = Self::connect(&self.pool, &self.channel)
            .await
            .map_err(|e| AppError::ChannelDisconnected(e.to_string()))?;

        let pool = self.pool.clone();
        let channel = self.channel.clone();
        let reconnect = self.reconnect;

        Ok(ChangeSubscription::spawn(user_id, true, move |signal| {
            Self::listen_loop(pool, channel, reconnect, user_id, Some(listener), signal)
        }))
    }
}

/// Whether a notification payload concerns `user_id`. Payloads that cannot be
/// read are treated as relevant.
fn affects_user(payload: &str, user_id: Uuid) -> bool {
    if let Ok(change) = serde_json::from_str::<SubscriptionChange>(payload) {
        return change.user_id == user_id;
    }
    if let Ok(id) = Uuid::parse_str(payload.trim()) {
        return id == user_id;
    }
    tracing::warn!(payload_len = payload.len(), "Unreadable change payload, invalidating");
    true
}

/// Publishes changes with `pg_notify`
#[derive(Clone)]
pub struct PgChangeNotifier {
    pool: PgPool,
    channel: String,
}

impl PgChangeNotifier {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ChangeNotifier for PgChangeNotifier {
    #[tracing::instrument(skip(self, change), fields(channel = %self.channel, user_id = %change.user_id))]
    async fn notify(&self, change: SubscriptionChange) -> Result<(), AppError> {
        let payload = serde_json::to_string(&change)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
