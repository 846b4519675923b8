//! Per-user subscription change stream (server-sent events).
//!
//! One `ready` event when the stream opens, then one `change` event per
//! invalidation. Events carry no row values. The stream ends when the backing
//! channel loses its connection, so the client notices and reconnects.

use crate::auth::AuthUser;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use verbatim_infra::ChangeSubscription;

pub const READY_EVENT: &str = "ready";
pub const CHANGE_EVENT: &str = "change";

#[utoipa::path(
    get,
    path = "/subscription-changes",
    tag = "entitlements",
    responses(
        (status = 200, description = "Event stream: `ready` once, then `change` whenever the user's subscription row changes", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 503, description = "Change channel unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, operation = "subscription_changes"))]
pub async fn subscription_changes(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpAppError> {
    let subscription = state.entitlements.changes.subscribe(user.user_id).await?;
    tracing::debug!("Change stream opened");

    let ready = stream::once(async { Ok(Event::default().event(READY_EVENT).data("{}")) });
    Ok(Sse::new(ready.chain(change_events(subscription))).keep_alive(KeepAlive::default()))
}

fn change_events(
    subscription: ChangeSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        if subscription.changed().await.is_err() {
            tracing::debug!(user_id = %subscription.user_id(), "Change listener stopped, closing stream");
            return None;
        }

        let state = subscription.state();
        if !state.connected {
            tracing::warn!(user_id = %subscription.user_id(), "Change channel lost, closing stream");
            return None;
        }

        let data = serde_json::json!({
            "userId": subscription.user_id(),
            "generation": state.generation,
        });
        let event = Event::default().event(CHANGE_EVENT).data(data.to_string());
        Some((Ok(event), subscription))
    })
}
