//! Request-ingress identity extraction (spec §4.6).
//!
//! Priority order, strictly: (1) trusted JWT-claim headers set by the outer
//! ingress, (2) a short-lived ticket query parameter validated against an
//! internal auth endpoint (used by transport upgrades that cannot carry
//! custom headers), (3) mesh-presented client certificates implying
//! internal service identity. Any other source is rejected.

use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

pub const HEADER_SUB: &str = "x-jwt-claim-sub";
pub const HEADER_TENANT: &str = "x-jwt-claim-tenant-id";
pub const HEADER_MESH_CLIENT_CN: &str = "x-forwarded-client-cert-cn";

pub const BROADCAST_USER: uuid::Uuid = uuid::Uuid::nil();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: String,
    pub user_id: String,
    pub source: IdentitySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    JwtClaimHeaders,
    Ticket,
    MeshClientCert,
}

/// Validates short-lived tickets against an internal auth endpoint.
#[derive(Clone)]
pub struct TicketValidator {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct TicketValidationResponse {
    tenant_id: String,
    user_id: String,
}

impl TicketValidator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn validate(&self, ticket: &str) -> Option<(String, String)> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("ticket", ticket)])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: TicketValidationResponse = resp.json().await.ok()?;
        Some((body.tenant_id, body.user_id))
    }
}

#[derive(Deserialize)]
struct TicketQuery {
    ticket: Option<String>,
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    Arc<TicketValidator>: axum::extract::FromRef<S>,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = (StatusCode::UNAUTHORIZED, "unauthorized");

        if let (Some(sub), Some(tenant)) = (
            parts.headers.get(HEADER_SUB),
            parts.headers.get(HEADER_TENANT),
        ) {
            let sub = sub.to_str().map_err(|_| unauthorized)?;
            let tenant = tenant.to_str().map_err(|_| unauthorized)?;
            if sub.is_empty() || tenant.is_empty() {
                return Err(unauthorized);
            }
            return Ok(Identity {
                tenant_id: tenant.to_string(),
                user_id: sub.to_string(),
                source: IdentitySource::JwtClaimHeaders,
            });
        }

        if let Ok(Query(q)) = Query::<TicketQuery>::try_from_uri(&parts.uri) {
            if let Some(ticket) = q.ticket {
                let validator = Arc::<TicketValidator>::from_ref(state);
                let (tenant_id, user_id) =
                    validator.validate(&ticket).await.ok_or(unauthorized)?;
                return Ok(Identity {
                    tenant_id,
                    user_id,
                    source: IdentitySource::Ticket,
                });
            }
        }

        if let Some(cn) = parts.headers.get(HEADER_MESH_CLIENT_CN) {
            let cn = cn.to_str().map_err(|_| unauthorized)?;
            if !cn.is_empty() {
                return Ok(Identity {
                    tenant_id: "internal".to_string(),
                    user_id: cn.to_string(),
                    source: IdentitySource::MeshClientCert,
                });
            }
        }

        Err(unauthorized)
    }
}
