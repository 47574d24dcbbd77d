//! Internal HTTP surface for the tenant routing reconciler (spec §4.6).
//!
//! Every route here is meant to sit behind a cluster-internal network
//! boundary; none of it re-derives caller identity the way the notification
//! hub's transport endpoints do.

use crate::context::ReconcileCtx;
use crate::model::{validate_slug, TenantStatus};
use crate::queue::{Queue, QueueFull};
use crate::repository::SlugAvailability;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tr_common::Error;

#[derive(Clone)]
pub struct HttpState {
    pub ctx: Arc<ReconcileCtx>,
    pub queue: Arc<Queue>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/hosts", post(create_host).get(list_hosts))
        .route("/api/v1/hosts/{slug}", get(get_host))
        .route("/api/v1/hosts/{slug}/sync", post(sync_host))
        .route("/api/v1/slugs/{slug}/availability", get(slug_availability))
        .route("/api/v1/cleanup", post(cleanup))
        .route("/api/v1/sync-vs-routes", post(sync_vs_routes))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

enum ApiError {
    Domain(Error),
    QueueFull,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Domain(e)
    }
}

impl From<QueueFull> for ApiError {
    fn from(_: QueueFull) -> Self {
        ApiError::QueueFull
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Domain(e) => {
                let status = match e {
                    Error::NotFound(_) => StatusCode::NOT_FOUND,
                    Error::AlreadyExists(_) | Error::Conflict(_) => StatusCode::CONFLICT,
                    Error::Malformed(_) => StatusCode::BAD_REQUEST,
                    Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "queue full".to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
struct CreateHostRequest {
    tenant_id: String,
    slug: String,
    admin_host: String,
    storefront_host: String,
    #[serde(default)]
    storefront_www_host: Option<String>,
    api_host: String,
    base_domain: String,
    #[serde(default)]
    is_custom_domain: bool,
}

async fn create_host(
    State(state): State<HttpState>,
    Json(req): Json<CreateHostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_slug(&req.slug).map_err(Error::Malformed)?;

    let record = state
        .ctx
        .repository
        .ensure_pending(
            &req.tenant_id,
            &req.slug,
            &req.admin_host,
            &req.storefront_host,
            req.storefront_www_host.as_deref(),
            &req.api_host,
            &req.base_domain,
            req.is_custom_domain,
        )
        .await?;

    state.queue.enqueue(&record.slug).await?;
    Ok((StatusCode::ACCEPTED, Json(record_json(&record))))
}

async fn get_host(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .ctx
        .repository
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| Error::NotFound(slug.clone()))?;
    Ok(Json(record_json(&record)))
}

async fn list_hosts(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.ctx.repository.list().await?;
    let body: Vec<_> = records.iter().map(record_json).collect();
    Ok(Json(body))
}

async fn sync_host(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .ctx
        .repository
        .get_by_slug(&slug)
        .await?
        .ok_or_else(|| Error::NotFound(slug.clone()))?;
    state.queue.enqueue(&slug).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
enum AvailabilityResponse {
    Available,
    InUse,
    RecentlyDeleted { days_remaining: i64 },
}

async fn slug_availability(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let availability = state.ctx.repository.slug_availability(&slug).await?;
    let body = match availability {
        SlugAvailability::Available => AvailabilityResponse::Available,
        SlugAvailability::InUse => AvailabilityResponse::InUse,
        SlugAvailability::RecentlyDeleted { days_remaining } => {
            AvailabilityResponse::RecentlyDeleted { days_remaining }
        }
    };
    Ok(Json(body))
}

#[derive(Serialize)]
struct CleanupResponse {
    deleted: u64,
}

/// Run the retention sweep on demand (normally driven by the periodic
/// ticker in the binary's main loop).
async fn cleanup(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.ctx.repository.sweep_expired().await?;
    Ok(Json(CleanupResponse { deleted }))
}

#[derive(Serialize)]
struct SyncVsRoutesResponse {
    enqueued: usize,
}

/// Re-derive every tenant's VirtualServices from the current templates by
/// requeueing every non-deleted record (spec §4.6).
async fn sync_vs_routes(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.ctx.repository.list().await?;
    let mut enqueued = 0;
    for record in &records {
        match state.queue.enqueue(&record.slug).await {
            Ok(()) => enqueued += 1,
            Err(QueueFull) => {
                tracing::warn!(msg = "queue full during sync-vs-routes, remaining slugs skipped", slug = %record.slug);
                break;
            }
        }
    }
    Ok(Json(SyncVsRoutesResponse { enqueued }))
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    let snapshot = state.queue.metrics().await;
    Json(serde_json::json!({
        "queue_enqueued_total": snapshot.enqueued_total,
        "queue_processed_total": snapshot.processed_total,
        "queue_retried_total": snapshot.retried_total,
        "queue_exhausted_total": snapshot.exhausted_total,
        "queue_in_progress": snapshot.in_progress,
    }))
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

fn record_json(record: &crate::model::TenantHostRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "tenant_id": record.tenant_id,
        "slug": record.slug,
        "admin_host": record.admin_host,
        "storefront_host": record.storefront_host,
        "storefront_www_host": record.storefront_www_host,
        "api_host": record.api_host,
        "base_domain": record.base_domain,
        "is_custom_domain": record.is_custom_domain,
        "status": status_str(record.status),
        "provisioned_at": record.provisioned_at,
        "last_error": record.last_error,
        "retry_count": record.retry_count,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

fn status_str(status: TenantStatus) -> &'static str {
    status.as_str()
}
