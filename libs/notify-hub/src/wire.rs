//! JSON wire envelope shared by the WebSocket and SSE transports (spec §6).

use crate::model::Notification;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-to-server frame, `{"type": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    MarkRead { notification_ids: Vec<Uuid> },
    MarkAllRead,
    Subscribe,
}

/// Server-to-client frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { unread_count: i64 },
    Notification(Box<Notification>),
    NotificationsBatch(Vec<Notification>),
    UnreadCount(i64),
    ReadStatusUpdated { ids: Vec<Uuid>, is_read: bool },
    Pong,
    Error { code: &'static str, message: String },
}
