//! Wires the durable event subscriber to the transform/persist/broadcast
//! pipeline (spec §4.5).
//!
//! One subscriber task per stream named in spec.md §6; all of them funnel
//! into the same handler, which is the only place dedup, audience
//! resolution and fan-out happen.

use crate::metrics::HubMetrics;
use crate::registry::ClientRegistry;
use crate::repository::Repository;
use crate::resolver::TargetUserResolver;
use crate::transform::{self, EventEnvelope};
use crate::wire::ServerMessage;

use async_nats::jetstream::Message;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tr_common::events::{ConsumerSpec, EventSubscriber, HandlerOutcome, StreamSpec};
use tracing::{debug, error, warn};

struct StreamDecl {
    name: &'static str,
    subject_filter: &'static str,
}

const STREAMS: &[StreamDecl] = &[
    StreamDecl { name: "TENANT_EVENTS", subject_filter: "tenant.>" },
    StreamDecl { name: "ORDER_EVENTS", subject_filter: "order.>" },
    StreamDecl { name: "PAYMENT_EVENTS", subject_filter: "payment.>" },
    StreamDecl { name: "INVENTORY_EVENTS", subject_filter: "inventory.>" },
    StreamDecl { name: "CUSTOMER_EVENTS", subject_filter: "customer.>" },
    StreamDecl { name: "RETURN_EVENTS", subject_filter: "return.>" },
    StreamDecl { name: "REVIEW_EVENTS", subject_filter: "review.>" },
];

/// Fans a [`ServerMessage`] out to a (tenant, user) pair on both transports.
pub struct Broadcaster {
    ws: Arc<ClientRegistry<ServerMessage>>,
    sse: Arc<ClientRegistry<ServerMessage>>,
}

impl Broadcaster {
    pub fn new(ws: Arc<ClientRegistry<ServerMessage>>, sse: Arc<ClientRegistry<ServerMessage>>) -> Self {
        Self { ws, sse }
    }

    pub fn send(&self, tenant_id: &str, user_id: uuid::Uuid, message: ServerMessage) {
        self.ws.broadcast(tenant_id, user_id, message.clone());
        self.sse.broadcast(tenant_id, user_id, message);
    }
}

struct Hub {
    repository: Repository,
    resolver: Arc<dyn TargetUserResolver>,
    broadcaster: Broadcaster,
    metrics: HubMetrics,
}

async fn handle_event(hub: &Hub, message: &Message) -> HandlerOutcome {
    let subject = message.subject.to_string();
    let event: EventEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(e) => e,
        Err(e) => {
            warn!(msg = "malformed event envelope, acking without retry", subject = %subject, %e);
            return HandlerOutcome::Ack;
        }
    };

    let templates = transform::transform(&event);
    if templates.is_empty() {
        debug!(msg = "event type has no notification mapping, acking", subject = %subject);
        return HandlerOutcome::Ack;
    }

    let admin_targets: Vec<uuid::Uuid> = hub
        .resolver
        .connected_admin_users(&event.tenant_id)
        .into_iter()
        .collect();

    for template in &templates {
        let rows = transform::materialize(template, &event, &admin_targets);

        for row in rows {
            if hub
                .repository
                .exists_by_source_event_id(&row.source_event_id)
                .await
                .unwrap_or(false)
            {
                continue;
            }

            let inserted = match hub.repository.insert(&row).await {
                Ok(n) => n,
                Err(e) if e.is_retryable() => {
                    warn!(msg = "failed to persist notification, will redeliver", subject = %subject, %e);
                    return HandlerOutcome::Nak;
                }
                Err(e) => {
                    error!(msg = "failed to persist notification, dropping to dead letter", subject = %subject, %e);
                    hub.metrics.dead_lettered_inc(&event.event_type);
                    continue;
                }
            };
            hub.metrics.notification_persisted_inc();

            let unread_count = hub
                .repository
                .unread_count(&inserted.tenant_id, inserted.user_id)
                .await
                .unwrap_or(0);

            hub.broadcaster.send(
                &inserted.tenant_id,
                inserted.user_id,
                ServerMessage::Notification(Box::new(inserted.clone())),
            );
            hub.broadcaster
                .send(&inserted.tenant_id, inserted.user_id, ServerMessage::UnreadCount(unread_count));
        }
    }

    HandlerOutcome::Ack
}

/// Ensure every stream exists and run one subscriber task per stream until
/// `cancel` fires.
pub async fn run(
    subscriber: EventSubscriber,
    repository: Repository,
    resolver: Arc<dyn TargetUserResolver>,
    ws: Arc<ClientRegistry<ServerMessage>>,
    sse: Arc<ClientRegistry<ServerMessage>>,
    metrics: HubMetrics,
    cancel: CancellationToken,
) {
    let hub = Arc::new(Hub {
        repository,
        resolver,
        broadcaster: Broadcaster::new(ws, sse),
        metrics,
    });

    let mut tasks = JoinSet::new();
    for decl in STREAMS {
        subscriber
            .ensure_stream(&StreamSpec {
                name: decl.name,
                subjects: vec![decl.subject_filter.to_string()],
            })
            .await;

        let subscriber = subscriber.clone();
        let hub = hub.clone();
        let cancel = cancel.clone();
        let durable_name = format!("notify-hub-{}", decl.name.to_lowercase());
        let stream_name = decl.name;
        let subject_filter = decl.subject_filter;
        tasks.spawn(async move {
            let spec = ConsumerSpec::new(durable_name, subject_filter);
            if let Err(e) = subscriber
                .run(stream_name, spec, cancel, move |message| {
                    let hub = hub.clone();
                    async move { handle_event(&hub, &message).await }
                })
                .await
            {
                error!(msg = "event subscriber loop exited with error", stream = stream_name, %e);
            }
        });
    }

    while tasks.join_next().await.is_some() {}
}
