//! Durable event subscriber shared by both cores (spec §4.1).
//!
//! Bootstraps a JetStream-backed stream if missing, binds a durable
//! queue-group consumer per topic with manual ack, and drains in-flight
//! messages on shutdown instead of abandoning them mid-processing.

use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{DiscardPolicy, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, consumer::pull};
use async_nats::jetstream::Message;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ENSURE_STREAM_RETRIES: u32 = 3;
const ENSURE_STREAM_RETRY_SPACING: Duration = Duration::from_secs(5);
const STREAM_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const STREAM_MAX_MESSAGES: i64 = 100_000;

/// Declares a durable stream this system assumes ownership of (or shares).
pub struct StreamSpec {
    pub name: &'static str,
    pub subjects: Vec<String>,
}

/// Declares a durable queue-group consumer bound to one topic filter.
pub struct ConsumerSpec {
    pub durable_name: String,
    pub filter_subject: String,
    pub queue_group: String,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub max_in_flight: i64,
    pub inactive_threshold: Duration,
}

impl ConsumerSpec {
    pub fn new(durable_name: impl Into<String>, filter_subject: impl Into<String>) -> Self {
        let durable_name = durable_name.into();
        Self {
            queue_group: durable_name.clone(),
            durable_name,
            filter_subject: filter_subject.into(),
            ack_wait: Duration::from_secs(45),
            max_deliver: 4,
            max_in_flight: 10,
            inactive_threshold: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What a message handler decided to do with a delivered message.
pub enum HandlerOutcome {
    /// Processed successfully, or the payload was malformed / a known
    /// duplicate: acknowledge so it is never redelivered.
    Ack,
    /// Transient failure: negative-acknowledge to trigger redelivery.
    Nak,
}

#[derive(Clone)]
pub struct EventSubscriber {
    jetstream: jetstream::Context,
}

impl EventSubscriber {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Ensure the stream exists with the configured retention policy. Retries
    /// three times, five seconds apart; on persistent failure it logs and
    /// continues, assuming another component owns the stream.
    pub async fn ensure_stream(&self, spec: &StreamSpec) {
        let config = jetstream::stream::Config {
            name: spec.name.to_string(),
            subjects: spec.subjects.clone(),
            storage: StorageType::File,
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::Old,
            max_age: STREAM_MAX_AGE,
            max_messages: STREAM_MAX_MESSAGES,
            ..Default::default()
        };

        for attempt in 1..=ENSURE_STREAM_RETRIES {
            match self.jetstream.get_or_create_stream(config.clone()).await {
                Ok(_) => {
                    info!(msg = "stream ensured", stream = spec.name);
                    return;
                }
                Err(e) => {
                    warn!(msg = "failed to ensure stream", stream = spec.name, attempt, %e);
                    if attempt < ENSURE_STREAM_RETRIES {
                        tokio::time::sleep(ENSURE_STREAM_RETRY_SPACING).await;
                    }
                }
            }
        }
        warn!(
            msg = "giving up ensuring stream, assuming another component owns it",
            stream = spec.name
        );
    }

    /// Bind a durable queue-group consumer and run `handler` for every
    /// delivered message until `cancel` fires, then drain in-flight work.
    pub async fn run<F, Fut>(
        &self,
        stream_name: &str,
        spec: ConsumerSpec,
        cancel: CancellationToken,
        handler: F,
    ) -> crate::Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerOutcome> + Send,
    {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| crate::Error::Stream(e.to_string()))?;

        // Stale-binding defence: delete any pre-existing consumer of the same
        // durable name before resubscribing.
        if stream.delete_consumer(&spec.durable_name).await.is_ok() {
            debug!(msg = "deleted stale consumer", durable = %spec.durable_name);
        }

        let consumer = stream
            .create_consumer(pull::Config {
                durable_name: Some(spec.durable_name.clone()),
                deliver_policy: DeliverPolicy::New,
                ack_policy: AckPolicy::Explicit,
                ack_wait: spec.ack_wait,
                max_deliver: spec.max_deliver,
                max_ack_pending: spec.max_in_flight,
                inactive_threshold: spec.inactive_threshold,
                filter_subject: spec.filter_subject.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| crate::Error::Stream(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| crate::Error::Stream(e.to_string()))?;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(msg = "draining subscriber", durable = %spec.durable_name);
                    break;
                }
                next = messages.next() => {
                    match next {
                        Some(Ok(message)) => {
                            let subject = message.subject.clone();
                            match handler(message.clone()).await {
                                HandlerOutcome::Ack => {
                                    if let Err(e) = message.ack().await {
                                        error!(msg = "failed to ack message", %subject, %e);
                                    }
                                }
                                HandlerOutcome::Nak => {
                                    if let Err(e) = message.ack_with(async_nats::jetstream::AckKind::Nak(None)).await {
                                        error!(msg = "failed to nak message", %subject, %e);
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(msg = "error pulling message", %e);
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }
}
