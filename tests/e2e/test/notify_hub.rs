//! Notification fan-out hub tests against a real Postgres database and NATS
//! JetStream (spec.md §8 scenarios 5 and 6). The connected-client registries
//! are driven directly rather than through a live WebSocket/SSE connection,
//! since the channel contract they exercise does not depend on the
//! transport carrying it.

use std::sync::Arc;
use std::time::Duration;

use notify_hub::repository::Repository;
use notify_hub::wire::ServerMessage;
use notify_hub::{CombinedResolver, TargetUserResolver};
use notify_hub::metrics::HubMetrics;
use notify_hub::ClientRegistry;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tr_common::events::EventSubscriber;
use uuid::Uuid;

use super::{test_db, test_stream};

fn test_metrics() -> HubMetrics {
    HubMetrics::new(&opentelemetry::global::meter("notify-hub-e2e-test"))
}

/// Two live transports for the same user both receive a `notification` and
/// an `unread_count` frame for a newly persisted event, and a replay of the
/// same source event produces neither a new row nor new frames.
#[tokio::test]
async fn order_created_fans_out_to_every_connected_client_once() {
    let tenant_id = format!("t-{}", &Uuid::new_v4().to_string()[..8]);
    let user_id = Uuid::new_v4();
    let source_id = format!("e2e-order-{}", Uuid::new_v4());

    let ws_registry: Arc<ClientRegistry<ServerMessage>> = Arc::new(ClientRegistry::new());
    let sse_registry: Arc<ClientRegistry<ServerMessage>> = Arc::new(ClientRegistry::new());
    let (_ws_client, mut ws_rx) = ws_registry.register(&tenant_id, user_id, 16);
    let (_sse_client, mut sse_rx) = sse_registry.register(&tenant_id, user_id, 16);

    let resolver: Arc<dyn TargetUserResolver> =
        Arc::new(CombinedResolver::new(ws_registry.clone(), sse_registry.clone()));
    let repository = Repository::new(test_db().await);
    let subscriber = EventSubscriber::new(test_stream().await);
    let cancel = CancellationToken::new();

    let run_handle = tokio::spawn(notify_hub::events::run(
        subscriber,
        repository.clone(),
        resolver,
        ws_registry.clone(),
        sse_registry.clone(),
        test_metrics(),
        cancel.clone(),
    ));

    // give the subscriber tasks time to bind their consumers before publishing
    tokio::time::sleep(Duration::from_secs(2)).await;

    let nats = test_stream().await;
    let publish = |source_id: String| {
        let nats = nats.clone();
        let tenant_id = tenant_id.clone();
        async move {
            let payload = serde_json::json!({
                "event_type": "order.created",
                "tenant_id": tenant_id,
                "source_id": source_id,
                "order_id": "o-e2e-1",
                "amount": 4200,
                "currency": "USD",
            });
            nats.publish("order.created", serde_json::to_vec(&payload).unwrap().into())
                .await
                .unwrap();
            nats.flush().await.unwrap();
        }
    };

    publish(source_id.clone()).await;

    // no customer_id in the payload, so only the admin template survives and
    // the single connected user is its only target: exactly one row.
    let first = timeout(Duration::from_secs(30), ws_rx.recv()).await.expect("ws frame in time");
    assert!(matches!(first, Some(ServerMessage::Notification(_))));
    let second = timeout(Duration::from_secs(30), ws_rx.recv()).await.expect("ws frame in time");
    assert!(matches!(second, Some(ServerMessage::UnreadCount(_))));

    let sse_first = timeout(Duration::from_secs(30), sse_rx.recv()).await.expect("sse frame in time");
    assert!(matches!(sse_first, Some(ServerMessage::Notification(_))));

    let rows = repository
        .list_for_user(&tenant_id, user_id, 50)
        .await
        .expect("list notifications");
    assert_eq!(rows.iter().filter(|n| n.source_event_id == source_id).count(), 1);

    publish(source_id.clone()).await;

    // the replay is deduped before insert, so no further frame arrives
    let replay = timeout(Duration::from_secs(5), ws_rx.recv()).await;
    assert!(replay.is_err(), "replayed event must not produce a second frame");

    let rows_after_replay = repository
        .list_for_user(&tenant_id, user_id, 50)
        .await
        .expect("list notifications");
    assert_eq!(rows_after_replay.iter().filter(|n| n.source_event_id == source_id).count(), 1);

    cancel.cancel();
    let _ = timeout(Duration::from_secs(10), run_handle).await;
}

/// A client whose outbound channel is full drops the frame without
/// affecting a sibling client of the same user, and without blocking.
#[tokio::test]
async fn slow_consumer_is_dropped_without_blocking_siblings() {
    let registry: Arc<ClientRegistry<u32>> = Arc::new(ClientRegistry::new());
    let tenant_id = "t-slow-consumer";
    let user_id = Uuid::new_v4();

    let (_slow_client, mut slow_rx) = registry.register(tenant_id, user_id, 1);
    let (_fast_client, mut fast_rx) = registry.register(tenant_id, user_id, 16);

    registry.broadcast(tenant_id, user_id, 1); // fills the slow client's channel
    registry.broadcast(tenant_id, user_id, 2); // dropped for the slow client only

    assert_eq!(fast_rx.recv().await, Some(1));
    assert_eq!(fast_rx.recv().await, Some(2));

    assert_eq!(slow_rx.recv().await, Some(1));
    let nothing_more = timeout(Duration::from_millis(200), slow_rx.recv()).await;
    assert!(nothing_more.is_err(), "the dropped frame must never arrive");
}
