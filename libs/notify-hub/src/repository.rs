//! Persistence for `notifications` (spec §3, §6 "Persistent state").

use crate::model::{NewNotification, Notification, Priority, BROADCAST_USER};

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tr_common::{Error, Result};
use uuid::Uuid;

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

fn row_to_notification(row: PgRow) -> Result<Notification> {
    let priority_raw: String = row.try_get("priority")?;
    let priority = priority_raw.parse::<Priority>().map_err(Error::Malformed)?;
    Ok(Notification {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        channel: row.try_get("channel")?,
        r#type: row.try_get("type")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        source_service: row.try_get("source_service")?,
        source_event_id: row.try_get("source_event_id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        metadata: row.try_get("metadata")?,
        group_key: row.try_get("group_key")?,
        priority,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
        is_archived: row.try_get("is_archived")?,
        archived_at: row.try_get("archived_at")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// True if a non-deleted notification already carries `source_event_id`
    /// (spec §3 invariant 1, the dedup primitive).
    pub async fn exists_by_source_event_id(&self, source_event_id: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM notifications WHERE source_event_id = $1 AND is_archived = false",
        )
        .bind(source_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Insert `n`. Races on `source_event_id` are treated as idempotent
    /// success, matching the dedup-by-existence-check contract.
    pub async fn insert(&self, n: &NewNotification) -> Result<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications
                (id, tenant_id, user_id, channel, type, title, message, source_service,
                 source_event_id, entity_type, entity_id, metadata, group_key, priority,
                 is_read, is_archived, created_at)
            VALUES ($1, $2, $3, 'in_app', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    false, false, now())
            ON CONFLICT (source_event_id) WHERE is_archived = false DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&n.tenant_id)
        .bind(n.user_id)
        .bind(&n.r#type)
        .bind(&n.title)
        .bind(&n.message)
        .bind(&n.source_service)
        .bind(&n.source_event_id)
        .bind(&n.entity_type)
        .bind(&n.entity_id)
        .bind(&n.metadata)
        .bind(&n.group_key)
        .bind(n.priority.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_notification(row),
            None => self
                .get_by_source_event_id(&n.source_event_id)
                .await?
                .ok_or_else(|| Error::Transient("notification vanished after insert race".into())),
        }
    }

    pub async fn get_by_source_event_id(&self, source_event_id: &str) -> Result<Option<Notification>> {
        let row = sqlx::query("SELECT * FROM notifications WHERE source_event_id = $1")
            .bind(source_event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_notification).transpose()
    }

    /// List for user `user_id` in `tenant_id`, unioned with broadcast rows
    /// (spec §3 invariant 2), newest first.
    pub async fn list_for_user(
        &self,
        tenant_id: &str,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE tenant_id = $1 AND (user_id = $2 OR user_id = $3) AND is_archived = false
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(BROADCAST_USER)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_notification).collect()
    }

    pub async fn unread_count(&self, tenant_id: &str, user_id: Uuid) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT count(*) FROM notifications
            WHERE tenant_id = $1 AND (user_id = $2 OR user_id = $3)
              AND is_archived = false AND is_read = false
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(BROADCAST_USER)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Mark `ids` read for `user_id`, scoped so a user cannot mark another
    /// user's private notification. Returns the ids actually updated.
    pub async fn mark_read(
        &self,
        tenant_id: &str,
        user_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let updated: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = now()
            WHERE tenant_id = $1 AND (user_id = $2 OR user_id = $3)
              AND id = ANY($4) AND is_read = false
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(BROADCAST_USER)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn mark_all_read(&self, tenant_id: &str, user_id: Uuid) -> Result<Vec<Uuid>> {
        let updated: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = now()
            WHERE tenant_id = $1 AND (user_id = $2 OR user_id = $3) AND is_read = false
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(BROADCAST_USER)
        .fetch_all(&self.pool)
        .await?;
        Ok(updated)
    }

    /// Soft-delete = archive (spec §3 invariant 3).
    pub async fn archive(&self, tenant_id: &str, user_id: Uuid, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notifications SET is_archived = true, archived_at = now()
            WHERE id = $1 AND tenant_id = $2 AND (user_id = $3 OR user_id = $4)
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(BROADCAST_USER)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard-delete notifications past `expires_at` (mirrors the tenant-host
    /// retention sweep; not separately specced but the column demands it).
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub fn format_expiry(ttl_days: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(ttl_days)
}
