//! Persistence for `tenant_host_records` and `provisioning_activity_logs`
//! (spec §3, §6 "Persistent state").

use crate::model::{ProvisioningActivityLog, TenantHostRecord, TenantStatus, QUARANTINE_DAYS};

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tr_common::{Error, Result};
use uuid::Uuid;

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

fn row_to_record(row: PgRow) -> Result<TenantHostRecord> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse::<TenantStatus>()
        .map_err(Error::Malformed)?;
    Ok(TenantHostRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        slug: row.try_get("slug")?,
        admin_host: row.try_get("admin_host")?,
        storefront_host: row.try_get("storefront_host")?,
        storefront_www_host: row.try_get("storefront_www_host")?,
        api_host: row.try_get("api_host")?,
        base_domain: row.try_get("base_domain")?,
        is_custom_domain: row.try_get("is_custom_domain")?,
        cert_name: row.try_get("cert_name")?,
        status,
        certificate_created: row.try_get("certificate_created")?,
        certificate_namespace: row.try_get("certificate_namespace")?,
        gateway_patched: row.try_get("gateway_patched")?,
        gateway_namespace: row.try_get("gateway_namespace")?,
        admin_vs_patched: row.try_get("admin_vs_patched")?,
        admin_vs_namespace: row.try_get("admin_vs_namespace")?,
        storefront_vs_patched: row.try_get("storefront_vs_patched")?,
        storefront_vs_namespace: row.try_get("storefront_vs_namespace")?,
        storefront_www_vs_patched: row.try_get("storefront_www_vs_patched")?,
        storefront_www_vs_namespace: row.try_get("storefront_www_vs_namespace")?,
        api_vs_patched: row.try_get("api_vs_patched")?,
        api_vs_namespace: row.try_get("api_vs_namespace")?,
        auth_policy_patched: row.try_get("auth_policy_patched")?,
        auth_policy_namespace: row.try_get("auth_policy_namespace")?,
        last_error: row.try_get("last_error")?,
        retry_count: row.try_get("retry_count")?,
        last_retry_at: row.try_get("last_retry_at")?,
        provisioned_at: row.try_get("provisioned_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

pub enum SlugAvailability {
    Available,
    InUse,
    RecentlyDeleted { days_remaining: i64 },
}

macro_rules! flag_setter {
    ($name:ident, $flag_col:literal, $ns_col:literal) => {
        pub async fn $name(&self, id: Uuid, namespace: &str) -> Result<()> {
            sqlx::query(concat!(
                "UPDATE tenant_host_records SET ",
                $flag_col,
                " = true, ",
                $ns_col,
                " = $2, updated_at = now() WHERE id = $1"
            ))
            .bind(id)
            .bind(namespace)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    };
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending record for `slug` if one doesn't already exist.
    /// Invariant (1): `slug` unique among non-deleted rows.
    pub async fn ensure_pending(
        &self,
        tenant_id: &str,
        slug: &str,
        admin_host: &str,
        storefront_host: &str,
        storefront_www_host: Option<&str>,
        api_host: &str,
        base_domain: &str,
        is_custom_domain: bool,
    ) -> Result<TenantHostRecord> {
        if let Some(existing) = self.get_by_slug(slug).await? {
            return Ok(existing);
        }

        let cert_name = format!("{slug}-tenant-tls");
        let row = sqlx::query(
            r#"
            INSERT INTO tenant_host_records
                (id, tenant_id, slug, admin_host, storefront_host, storefront_www_host,
                 api_host, base_domain, is_custom_domain, cert_name, status,
                 retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 0, now(), now())
            ON CONFLICT (slug) WHERE deleted_at IS NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(slug)
        .bind(admin_host)
        .bind(storefront_host)
        .bind(storefront_www_host)
        .bind(api_host)
        .bind(base_domain)
        .bind(is_custom_domain)
        .bind(&cert_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_record(row),
            // Lost the insert race; the other writer's row is the truth.
            None => self
                .get_by_slug(slug)
                .await?
                .ok_or_else(|| Error::Transient("record vanished after insert race".into())),
        }
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<TenantHostRecord>> {
        let row = sqlx::query("SELECT * FROM tenant_host_records WHERE slug = $1 AND deleted_at IS NULL")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<TenantHostRecord>> {
        let row = sqlx::query("SELECT * FROM tenant_host_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list(&self) -> Result<Vec<TenantHostRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tenant_host_records WHERE deleted_at IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Records stuck `pending`, or `provisioned` with a required flag false.
    pub async fn list_incomplete(&self) -> Result<Vec<TenantHostRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tenant_host_records
            WHERE deleted_at IS NULL AND (
                status = 'pending'
                OR (status = 'provisioned' AND (
                    NOT certificate_created OR NOT gateway_patched OR NOT admin_vs_patched
                    OR NOT storefront_vs_patched OR NOT api_vs_patched
                    OR (is_custom_domain AND NOT auth_policy_patched)
                    OR (storefront_www_host IS NOT NULL AND NOT storefront_www_vs_patched)
                ))
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn list_deleting(&self) -> Result<Vec<TenantHostRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tenant_host_records WHERE status = 'deleting' AND deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn slug_availability(&self, slug: &str) -> Result<SlugAvailability> {
        if self.get_by_slug(slug).await?.is_some() {
            return Ok(SlugAvailability::InUse);
        }
        let deleted_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT deleted_at FROM tenant_host_records WHERE slug = $1 AND deleted_at IS NOT NULL ORDER BY deleted_at DESC LIMIT 1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        match deleted_at {
            Some(deleted_at) => {
                let quarantine_end = deleted_at + Duration::days(QUARANTINE_DAYS);
                let remaining = (quarantine_end - Utc::now()).num_days().max(0);
                if remaining > 0 {
                    Ok(SlugAvailability::RecentlyDeleted {
                        days_remaining: remaining,
                    })
                } else {
                    Ok(SlugAvailability::Available)
                }
            }
            None => Ok(SlugAvailability::Available),
        }
    }

    flag_setter!(
        set_certificate_created,
        "certificate_created",
        "certificate_namespace"
    );
    flag_setter!(set_gateway_patched, "gateway_patched", "gateway_namespace");
    flag_setter!(
        set_admin_vs_patched,
        "admin_vs_patched",
        "admin_vs_namespace"
    );
    flag_setter!(
        set_storefront_vs_patched,
        "storefront_vs_patched",
        "storefront_vs_namespace"
    );
    flag_setter!(
        set_storefront_www_vs_patched,
        "storefront_www_vs_patched",
        "storefront_www_vs_namespace"
    );
    flag_setter!(set_api_vs_patched, "api_vs_patched", "api_vs_namespace");
    flag_setter!(
        set_auth_policy_patched,
        "auth_policy_patched",
        "auth_policy_namespace"
    );

    /// Reset a flag to false (used by startup drift reconciliation when the
    /// cluster object is missing but the DB says otherwise).
    pub async fn clear_flag(&self, id: Uuid, flag_col: &str) -> Result<()> {
        let allowed = [
            "certificate_created",
            "gateway_patched",
            "admin_vs_patched",
            "storefront_vs_patched",
            "storefront_www_vs_patched",
            "api_vs_patched",
            "auth_policy_patched",
        ];
        if !allowed.contains(&flag_col) {
            return Err(Error::Malformed(format!("unknown flag column {flag_col}")));
        }
        let sql = format!(
            "UPDATE tenant_host_records SET {flag_col} = false, updated_at = now() WHERE id = $1"
        );
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_provisioned(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE tenant_host_records
               SET status = 'provisioned', provisioned_at = now(), last_error = NULL, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE tenant_host_records
               SET status = 'failed', last_error = $2, retry_count = retry_count + 1,
                   last_retry_at = now(), updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<()> {
        sqlx::query("UPDATE tenant_host_records SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE tenant_host_records SET status = 'deleted', deleted_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retention sweep: hard-delete rows past the 15-day quarantine window.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tenant_host_records WHERE deleted_at IS NOT NULL AND deleted_at < now() - ($1 || ' days')::interval",
        )
        .bind(QUARANTINE_DAYS.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn log_activity(
        &self,
        tenant_host_id: Uuid,
        action: &str,
        resource: &str,
        namespace: &str,
        success: bool,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO provisioning_activity_logs
               (id, tenant_host_id, action, resource, namespace, success, error_message, duration_ms, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_host_id)
        .bind(action)
        .bind(resource)
        .bind(namespace)
        .bind(success)
        .bind(error_message)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_activity(&self, tenant_host_id: Uuid) -> Result<Vec<ProvisioningActivityLog>> {
        sqlx::query_as::<_, ProvisioningActivityLog>(
            "SELECT * FROM provisioning_activity_logs WHERE tenant_host_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_host_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }
}
