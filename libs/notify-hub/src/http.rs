//! HTTP surface: transport upgrades plus the read-model REST endpoints
//! (spec §4.4, §4.6). Every route here authenticates via [`Identity`].

use crate::context::HubState;
use crate::{sse, ws};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tr_common::identity::Identity;
use uuid::Uuid;

pub fn router(state: HubState) -> Router {
    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/sse", get(sse::stream))
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/mark-read", post(mark_read))
        .route("/api/v1/notifications/mark-all-read", post(mark_all_read))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_notifications(
    State(state): State<HubState>,
    identity: Identity,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&identity.user_id) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid user id"}))).into_response();
    };
    match state
        .repository
        .list_for_user(&identity.tenant_id, user_id, query.limit)
        .await
    {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}

#[derive(Deserialize)]
struct MarkReadRequest {
    notification_ids: Vec<Uuid>,
}

async fn mark_read(
    State(state): State<HubState>,
    identity: Identity,
    Json(body): Json<MarkReadRequest>,
) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&identity.user_id) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid user id"}))).into_response();
    };
    match state
        .repository
        .mark_read(&identity.tenant_id, user_id, &body.notification_ids)
        .await
    {
        Ok(ids) => Json(serde_json::json!({"updated": ids})).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}

async fn mark_all_read(State(state): State<HubState>, identity: Identity) -> impl IntoResponse {
    let Ok(user_id) = Uuid::parse_str(&identity.user_id) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid user id"}))).into_response();
    };
    match state.repository.mark_all_read(&identity.tenant_id, user_id).await {
        Ok(ids) => Json(serde_json::json!({"updated": ids})).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}
