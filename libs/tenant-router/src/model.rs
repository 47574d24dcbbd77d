//! The tenant-host data model (spec §3).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use chrono::{DateTime, Utc};
use uuid::Uuid;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").unwrap());

pub const SLUG_MIN_LEN: usize = 2;
pub const SLUG_MAX_LEN: usize = 63;
pub const QUARANTINE_DAYS: i64 = 15;

/// Validate a tenant slug against the DNS-label rule (spec Glossary).
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.len() < SLUG_MIN_LEN || slug.len() > SLUG_MAX_LEN {
        return Err(format!(
            "slug must be {SLUG_MIN_LEN}-{SLUG_MAX_LEN} characters, got {}",
            slug.len()
        ));
    }
    if !SLUG_RE.is_match(slug) {
        return Err("slug must match ^[a-z0-9][a-z0-9-]*[a-z0-9]$".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pending,
    Provisioned,
    Failed,
    Deleting,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Pending => "pending",
            TenantStatus::Provisioned => "provisioned",
            TenantStatus::Failed => "failed",
            TenantStatus::Deleting => "deleting",
            TenantStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TenantStatus::Pending),
            "provisioned" => Ok(TenantStatus::Provisioned),
            "failed" => Ok(TenantStatus::Failed),
            "deleting" => Ok(TenantStatus::Deleting),
            "deleted" => Ok(TenantStatus::Deleted),
            other => Err(format!("unknown tenant status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantHostRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub slug: String,
    pub admin_host: String,
    pub storefront_host: String,
    pub storefront_www_host: Option<String>,
    pub api_host: String,
    pub base_domain: String,
    pub is_custom_domain: bool,
    pub cert_name: String,
    pub status: TenantStatus,

    pub certificate_created: bool,
    pub certificate_namespace: Option<String>,
    pub gateway_patched: bool,
    pub gateway_namespace: Option<String>,
    pub admin_vs_patched: bool,
    pub admin_vs_namespace: Option<String>,
    pub storefront_vs_patched: bool,
    pub storefront_vs_namespace: Option<String>,
    pub storefront_www_vs_patched: bool,
    pub storefront_www_vs_namespace: Option<String>,
    pub api_vs_patched: bool,
    pub api_vs_namespace: Option<String>,
    pub auth_policy_patched: bool,
    pub auth_policy_namespace: Option<String>,

    pub last_error: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantHostRecord {
    /// Invariant (2): required flags for `status=provisioned`, which differ
    /// by domain type.
    pub fn required_flags_satisfied(&self) -> bool {
        let base = self.certificate_created
            && self.gateway_patched
            && self.admin_vs_patched
            && self.storefront_vs_patched
            && self.api_vs_patched;
        if !self.is_custom_domain {
            return base;
        }
        let www_ok = self.storefront_www_host.is_none() || self.storefront_www_vs_patched;
        base && self.auth_policy_patched && www_ok
    }

    pub fn default_domain_hosts(&self) -> Vec<&str> {
        vec![self.admin_host.as_str(), self.storefront_host.as_str()]
    }

    pub fn custom_domain_names(&self) -> Vec<String> {
        let mut names = vec![self.storefront_host.clone()];
        if self.admin_host != self.storefront_host {
            names.push(self.admin_host.clone());
        }
        if let Some(www) = &self.storefront_www_host {
            names.push(www.clone());
        }
        if !self.api_host.is_empty() {
            names.push(self.api_host.clone());
        }
        names
    }

    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts = vec![
            self.admin_host.clone(),
            self.storefront_host.clone(),
            self.api_host.clone(),
        ];
        if let Some(www) = &self.storefront_www_host {
            hosts.push(www.clone());
        }
        hosts
    }
}

/// Append-only provisioning audit trail (spec §3).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProvisioningActivityLog {
    pub id: Uuid,
    pub tenant_host_id: Uuid,
    pub action: String,
    pub resource: String,
    pub namespace: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    CertificateReady,
    GatewayConfigured,
    AdminVSConfigured,
    StorefrontVSConfigured,
    StorefrontWwwVSConfigured,
    APIVSConfigured,
    AuthPolicyConfigured,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Provisioning,
    Provisioned,
    Failed,
    ResourceExists,
}

/// One named (type, status, reason, message, timestamp) tuple (spec Glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_length_boundaries() {
        assert!(validate_slug("a").is_err());
        assert!(validate_slug("ab").is_ok());
        assert!(validate_slug(&"a".repeat(63)).is_ok());
        assert!(validate_slug(&"a".repeat(64)).is_err());
    }

    #[test]
    fn slug_leading_trailing_hyphen_rejected() {
        assert!(validate_slug("-abc").is_err());
        assert!(validate_slug("abc-").is_err());
        assert!(validate_slug("ab-c").is_ok());
    }

    #[test]
    fn slug_rejects_uppercase_and_underscore() {
        assert!(validate_slug("Abcd").is_err());
        assert!(validate_slug("ab_cd").is_err());
    }
}
