//! WebSocket transport (spec §4.4).

use crate::context::HubState;
use crate::wire::{ClientMessage, ServerMessage};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tr_common::identity::Identity;
use tracing::{debug, warn};
use uuid::Uuid;

pub async fn upgrade(
    State(state): State<HubState>,
    identity: Identity,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: HubState, identity: Identity) {
    let Ok(user_id) = Uuid::parse_str(&identity.user_id) else {
        warn!(msg = "identity user_id is not a uuid, closing socket", user_id = %identity.user_id);
        return;
    };
    let tenant_id = identity.tenant_id.clone();

    let (client_id, rx) = state
        .ws_registry
        .register(&tenant_id, user_id, state.client_channel_capacity);

    let unread_count = state
        .repository
        .unread_count(&tenant_id, user_id)
        .await
        .unwrap_or(0);

    let (sink, stream) = socket.split();
    let ping_interval = Duration::from_secs(state.ws_ping_secs);

    tokio::select! {
        _ = write_loop(sink, rx, unread_count, ping_interval) => {}
        _ = read_loop(stream, &state, &tenant_id, user_id) => {}
    }

    state.ws_registry.unregister(&tenant_id, user_id, client_id);
    debug!(msg = "websocket client disconnected", tenant_id, %user_id, %client_id);
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    unread_count: i64,
    ping_interval: Duration,
) {
    let connected = ServerMessage::Connected { unread_count };
    if send_frame(&mut sink, &connected).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    state: &HubState,
    tenant_id: &str,
    user_id: Uuid,
) {
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(ClientMessage::Ping) => {
                state.ws_registry.broadcast(tenant_id, user_id, ServerMessage::Pong);
            }
            Ok(ClientMessage::MarkRead { notification_ids }) => {
                if let Ok(ids) = state.repository.mark_read(tenant_id, user_id, &notification_ids).await {
                    state.ws_registry.broadcast(
                        tenant_id,
                        user_id,
                        ServerMessage::ReadStatusUpdated { ids, is_read: true },
                    );
                }
            }
            Ok(ClientMessage::MarkAllRead) => {
                if let Ok(ids) = state.repository.mark_all_read(tenant_id, user_id).await {
                    state.ws_registry.broadcast(
                        tenant_id,
                        user_id,
                        ServerMessage::ReadStatusUpdated { ids, is_read: true },
                    );
                }
            }
            Ok(ClientMessage::Subscribe) => {}
            Err(e) => {
                debug!(msg = "ignoring malformed client frame", %e);
                state.ws_registry.broadcast(
                    tenant_id,
                    user_id,
                    ServerMessage::Error { code: "bad_frame", message: e.to_string() },
                );
            }
        }
    }
}
