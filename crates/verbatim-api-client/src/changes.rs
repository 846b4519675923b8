//! Remote change channel over the API's `/subscription-changes` event stream

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use uuid::Uuid;
use verbatim_core::AppError;
use verbatim_infra::{ChangeChannel, ChangeSignal, ChangeSubscription, ReconnectPolicy};

use crate::{ApiClient, SUBSCRIPTION_CHANGES_PATH};

/// Event name the server sends for each invalidation
pub const CHANGE_EVENT: &str = "change";

/// Per-user change subscription held open against the API.
///
/// The stream is bound to the access token; the server filters it to the
/// token's user. A dropped stream marks the subscription disconnected until a
/// reconnect succeeds, and the reconnect itself counts as an invalidation.
#[derive(Clone)]
pub struct HttpChangeChannel {
    client: ApiClient,
    access_token: String,
    reconnect: ReconnectPolicy,
}

impl HttpChangeChannel {
    pub fn new(client: ApiClient, access_token: impl Into<String>) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    async fn listen_loop(
        self,
        user_id: Uuid,
        mut response: Option<Response>,
        signal: ChangeSignal,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if let Some(active) = response.take() {
                if !Self::consume(active, user_id, &signal).await {
                    return;
                }
                signal.set_connected(false);
            }

            let delay = self.reconnect.delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = signal.closed() => return,
            }

            match self
                .client
                .open_stream(SUBSCRIPTION_CHANGES_PATH, &self.access_token)
                .await
            {
                Ok(active) => {
                    tracing::info!(%user_id, "Change stream reconnected");
                    attempt = 0;
                    signal.set_connected(true);
                    response = Some(active);
                }
                Err(AppError::NotAuthenticated) => {
                    tracing::warn!(%user_id, "Change stream rejected the session, giving up");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        %user_id,
                        retry_in_ms = self.reconnect.delay(attempt).as_millis() as u64,
                        "Change stream reconnect failed, will retry"
                    );
                }
            }
        }
    }

    /// Read one stream until it ends. Returns `false` once the subscription is dropped.
    async fn consume(response: Response, user_id: Uuid, signal: &ChangeSignal) -> bool {
        let mut body = response.bytes_stream();
        let mut parser = EventParser::default();

        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.push(&bytes) {
                            if event == CHANGE_EVENT {
                                signal.changed();
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, %user_id, "Change stream read failed");
                        return true;
                    }
                    None => {
                        tracing::warn!(%user_id, "Change stream closed by server");
                        return true;
                    }
                },
                _ = signal.closed() => return false,
            }
        }
    }
}

impl std::fmt::Debug for HttpChangeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChangeChannel")
            .field("base_url", &self.client.base_url())
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ChangeChannel for HttpChangeChannel {
    #[tracing::instrument(skip(self))]
    async fn subscribe(&self, user_id: Uuid) -> Result<ChangeSubscription, AppError> {
        let response = self
            .client
            .open_stream(SUBSCRIPTION_CHANGES_PATH, &self.access_token)
            .await
            .map_err(|e| match e {
                AppError::NotAuthenticated => AppError::NotAuthenticated,
                other => AppError::ChannelDisconnected(other.to_string()),
            })?;

        let channel = self.clone();
        Ok(ChangeSubscription::spawn(user_id, true, move |signal| {
            channel.listen_loop(user_id, Some(response), signal)
        }))
    }
}

/// Incremental `text/event-stream` reader. Yields event names only; the
/// payloads carry nothing a subscriber acts on.
#[derive(Debug, Default)]
struct EventParser {
    buffer: String,
}

impl EventParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            let mut name = None;
            let mut has_data = false;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.trim().to_string());
                } else if line.starts_with("data:") {
                    has_data = true;
                }
            }
            match name {
                Some(name) => events.push(name),
                None if has_data => events.push("message".to_string()),
                // comment-only block (keep-alive)
                None => {}
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parked_reconnect() -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_parser_handles_split_chunks_and_keep_alives() {
        let mut parser = EventParser::default();
        assert_eq!(
            parser.push(b"event: ready\ndata: {}\n\n:\n\nevent: cha"),
            vec!["ready".to_string()]
        );
        assert_eq!(parser.push(b"nge\ndata: {\"userId\":1}\n"), Vec::<String>::new());
        assert_eq!(parser.push(b"\n"), vec![CHANGE_EVENT.to_string()]);
        assert_eq!(
            parser.push(b"data: plain\r\n\r\n"),
            vec!["message".to_string()]
        );
    }

    #[tokio::test]
    async fn test_change_event_invalidates_then_close_disconnects() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/subscription-changes")
            .match_header("authorization", "Bearer jwt-token")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("event: ready\ndata: {}\n\nevent: change\ndata: {}\n\n")
            .create_async()
            .await;

        let client = ApiClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let channel =
            HttpChangeChannel::new(client, "jwt-token").with_reconnect_policy(parked_reconnect());
        let mut sub = channel.subscribe(Uuid::new_v4()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while sub.is_connected() {
                sub.changed().await.unwrap();
            }
        })
        .await
        .expect("stream end was not noticed");

        assert_eq!(sub.state().generation, 1);
        assert!(!sub.is_connected());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_token_fails_subscribe() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/subscription-changes")
            .with_status(401)
            .create_async()
            .await;

        let client = ApiClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = HttpChangeChannel::new(client, "expired")
            .subscribe(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_channel_disconnected() {
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = HttpChangeChannel::new(client, "jwt-token")
            .subscribe(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ChannelDisconnected(_)));
    }
}
