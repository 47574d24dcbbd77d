//! Hub instrumentation (spec §7 "Observability").

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

#[derive(Clone)]
pub struct HubMetrics {
    broadcasts: Counter<u64>,
    dropped: Counter<u64>,
    connected_clients: Gauge<i64>,
    notifications_persisted: Counter<u64>,
    dead_lettered: Counter<u64>,
}

impl HubMetrics {
    pub fn new(meter: &Meter) -> Self {
        let broadcasts = meter
            .u64_counter("notify_hub_broadcasts")
            .with_description("Number of notification frames fanned out to a client")
            .build();

        let dropped = meter
            .u64_counter("notify_hub_dropped_frames")
            .with_description("Number of frames dropped because a client's channel was full")
            .build();

        let connected_clients = meter
            .i64_gauge("notify_hub_connected_clients")
            .with_description("Number of live WebSocket/SSE clients per transport")
            .build();

        let notifications_persisted = meter
            .u64_counter("notify_hub_notifications_persisted")
            .with_description("Number of notification rows persisted")
            .build();

        let dead_lettered = meter
            .u64_counter("notify_hub_dead_lettered")
            .with_description("Number of events that failed transform or persistence terminally")
            .build();

        Self {
            broadcasts,
            dropped,
            connected_clients,
            notifications_persisted,
            dead_lettered,
        }
    }

    pub fn broadcast_inc(&self, transport: &'static str) {
        self.broadcasts.add(1, &[KeyValue::new("transport", transport)]);
    }

    pub fn dropped_inc(&self, transport: &'static str) {
        self.dropped.add(1, &[KeyValue::new("transport", transport)]);
    }

    pub fn connected_clients_set(&self, transport: &'static str, count: i64) {
        self.connected_clients
            .record(count, &[KeyValue::new("transport", transport)]);
    }

    pub fn notification_persisted_inc(&self) {
        self.notifications_persisted.add(1, &[]);
    }

    pub fn dead_lettered_inc(&self, event_type: &str) {
        self.dead_lettered
            .add(1, &[KeyValue::new("event_type", event_type.to_string())]);
    }
}
