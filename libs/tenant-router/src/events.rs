//! Wires the durable event subscriber to the work queue (spec §4.1, §4.2).

use crate::queue::Queue;
use crate::repository::Repository;

use async_nats::jetstream::Message;
use serde::Deserialize;
use std::sync::Arc;
use tr_common::events::{ConsumerSpec, EventSubscriber, HandlerOutcome, StreamSpec};
use tracing::{debug, warn};

pub const STREAM_NAME: &str = "TENANT_EVENTS";
const SUBJECT_FILTER: &str = "tenant.>";

#[derive(Debug, Deserialize)]
struct TenantCreatedPayload {
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

#[derive(Debug, Deserialize)]
struct TenantDeletedPayload {
    slug: String,
}

async fn handle_created(repository: &Repository, queue: &Queue, message: &Message) -> HandlerOutcome {
    let payload: TenantCreatedPayload = match serde_json::from_slice(&message.payload) {
        Ok(p) => p,
        Err(e) => {
            warn!(msg = "malformed tenant.created payload, acking without retry", %e);
            return HandlerOutcome::Ack;
        }
    };

    if let Err(e) = crate::model::validate_slug(&payload.slug) {
        warn!(msg = "tenant.created payload has invalid slug, acking without retry", slug = %payload.slug, %e);
        return HandlerOutcome::Ack;
    }

    match repository
        .ensure_pending(
            &payload.tenant_id,
            &payload.slug,
            &payload.admin_host,
            &payload.storefront_host,
            payload.storefront_www_host.as_deref(),
            &payload.api_host,
            &payload.base_domain,
            payload.is_custom_domain,
        )
        .await
    {
        Ok(_) => {
            if queue.enqueue(&payload.slug).await.is_err() {
                warn!(msg = "work queue full, will redeliver tenant.created", slug = %payload.slug);
                return HandlerOutcome::Nak;
            }
            HandlerOutcome::Ack
        }
        Err(e) if e.is_retryable() => {
            warn!(msg = "failed to persist tenant.created, will redeliver", slug = %payload.slug, %e);
            HandlerOutcome::Nak
        }
        Err(e) => {
            warn!(msg = "tenant.created handling failed terminally, acking", slug = %payload.slug, %e);
            HandlerOutcome::Ack
        }
    }
}

async fn handle_deleted(repository: &Repository, queue: &Queue, message: &Message) -> HandlerOutcome {
    let payload: TenantDeletedPayload = match serde_json::from_slice(&message.payload) {
        Ok(p) => p,
        Err(e) => {
            warn!(msg = "malformed tenant.deleted payload, acking without retry", %e);
            return HandlerOutcome::Ack;
        }
    };

    let record_id = match repository.get_by_slug(&payload.slug).await {
        Ok(Some(record)) => record.id,
        Ok(None) => {
            debug!(msg = "tenant.deleted for unknown slug, acking", slug = %payload.slug);
            return HandlerOutcome::Ack;
        }
        Err(e) => {
            warn!(msg = "failed to look up tenant for deletion, will redeliver", slug = %payload.slug, %e);
            return HandlerOutcome::Nak;
        }
    };

    match repository
        .set_status(record_id, crate::model::TenantStatus::Deleting)
        .await
    {
        Ok(()) => {
            if queue.enqueue(&payload.slug).await.is_err() {
                warn!(msg = "work queue full, will redeliver tenant.deleted", slug = %payload.slug);
                return HandlerOutcome::Nak;
            }
            HandlerOutcome::Ack
        }
        Err(e) if e.is_retryable() => HandlerOutcome::Nak,
        Err(_) => HandlerOutcome::Ack,
    }
}

/// Ensure the stream exists, then run the subscriber loop until `cancel`
/// fires. Returned future resolves once the subscription is drained.
pub async fn run(
    subscriber: EventSubscriber,
    repository: Repository,
    queue: Arc<Queue>,
    cancel: tokio_util::sync::CancellationToken,
) -> tr_common::Result<()> {
    subscriber
        .ensure_stream(&StreamSpec {
            name: STREAM_NAME,
            subjects: vec!["tenant.>".to_string()],
        })
        .await;

    let spec = ConsumerSpec::new("tenant-router-tenant-events", SUBJECT_FILTER);

    subscriber
        .run(STREAM_NAME, spec, cancel, move |message| {
            let repository = repository.clone();
            let queue = queue.clone();
            async move {
                let subject = message.subject.to_string();
                if subject.ends_with(".created") {
                    handle_created(&repository, &queue, &message).await
                } else if subject.ends_with(".deleted") {
                    handle_deleted(&repository, &queue, &message).await
                } else {
                    debug!(msg = "ignoring unrecognized tenant subject", subject = %subject);
                    HandlerOutcome::Ack
                }
            }
        })
        .await
}
