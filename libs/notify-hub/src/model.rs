//! The notification data model (spec §3 "Notification").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel `user_id` meaning "every connected user in the tenant".
pub use tr_common::identity::BROADCAST_USER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown notification priority: {other}")),
        }
    }
}

/// A persisted, fanned-out notification (spec §3). `channel` is always
/// `"in_app"` for this core; other channels are out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub channel: String,
    pub r#type: String,
    pub title: String,
    pub message: String,
    pub source_service: String,
    pub source_event_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: serde_json::Value,
    pub group_key: Option<String>,
    pub priority: Priority,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What [`crate::transform`] produces before persistence assigns `id`/`created_at`.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub tenant_id: String,
    pub user_id: Uuid,
    pub r#type: String,
    pub title: String,
    pub message: String,
    pub source_service: String,
    pub source_event_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: serde_json::Value,
    pub group_key: Option<String>,
    pub priority: Priority,
}

impl NewNotification {
    /// Key customer-facing notifications with a `-customer` suffix so the
    /// admin-facing and customer-facing variants of the same event can both
    /// persist without colliding on the dedup key (spec §4.5).
    pub fn customer_dedup_key(base_event_id: &str) -> String {
        format!("{base_event_id}-customer")
    }
}
