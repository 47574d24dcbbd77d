//! Server-sent-events transport, the no-WebSocket fallback (spec §4.4).

use crate::context::HubState;
use crate::wire::ServerMessage;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tr_common::identity::Identity;
use uuid::Uuid;

/// Unregisters the client from its registry when the SSE response future is
/// dropped, whichever side closed the connection.
struct UnregisterGuard {
    registry: Arc<crate::registry::ClientRegistry<ServerMessage>>,
    tenant_id: String,
    user_id: Uuid,
    client_id: Uuid,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.tenant_id, self.user_id, self.client_id);
    }
}

pub async fn stream(
    State(state): State<HubState>,
    identity: Identity,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&identity.user_id) else {
        return Sse::new(futures::stream::empty()).into_response();
    };
    let tenant_id = identity.tenant_id.clone();

    let (client_id, rx) = state
        .sse_registry
        .register(&tenant_id, user_id, state.client_channel_capacity);

    let unread_count = state
        .repository
        .unread_count(&tenant_id, user_id)
        .await
        .unwrap_or(0);

    let registry = state.sse_registry.clone();
    let heartbeat = state.sse_heartbeat_secs;
    let events = build_stream(tenant_id, user_id, client_id, registry, rx, unread_count);

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(heartbeat)).text("heartbeat"))
        .into_response()
}

fn to_event(message: &ServerMessage) -> Event {
    let (name, data) = match message {
        ServerMessage::Connected { .. } => ("connected", message),
        ServerMessage::Notification(_) => ("notification", message),
        ServerMessage::NotificationsBatch(_) => ("notifications_batch", message),
        ServerMessage::UnreadCount(_) => ("unread_count", message),
        ServerMessage::ReadStatusUpdated { .. } => ("read_status_updated", message),
        ServerMessage::Pong => ("pong", message),
        ServerMessage::Error { .. } => ("error", message),
    };
    Event::default().event(name).json_data(data).unwrap_or_else(|_| Event::default().event("error"))
}

enum StreamState {
    Connected { unread_count: i64 },
    Draining,
}

fn build_stream(
    tenant_id: String,
    user_id: Uuid,
    client_id: Uuid,
    registry: Arc<crate::registry::ClientRegistry<ServerMessage>>,
    rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    unread_count: i64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = UnregisterGuard { registry, tenant_id, user_id, client_id };
    let inbound = ReceiverStream::new(rx);
    futures::stream::unfold(
        (StreamState::Connected { unread_count }, inbound, guard),
        |(phase, mut inbound, guard)| async move {
            match phase {
                StreamState::Connected { unread_count } => {
                    let event = to_event(&ServerMessage::Connected { unread_count });
                    Some((Ok(event), (StreamState::Draining, inbound, guard)))
                }
                StreamState::Draining => {
                    let message = inbound.next().await?;
                    Some((Ok(to_event(&message)), (StreamState::Draining, inbound, guard)))
                }
            }
        },
    )
}
