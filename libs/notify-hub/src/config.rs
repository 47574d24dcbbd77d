//! Notification hub configuration layered on [`tr_common::config::CommonArgs`].

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct NotifyHubArgs {
    #[command(flatten)]
    pub common: tr_common::config::CommonArgs,

    /// Internal auth endpoint validating transport-upgrade tickets (spec §4.6).
    #[arg(long, env)]
    pub ticket_validation_endpoint: String,

    /// Capacity of each connected client's bounded outbound queue.
    #[arg(long, default_value_t = crate::registry::CLIENT_CHANNEL_CAPACITY, env)]
    pub client_channel_capacity: usize,

    /// SSE heartbeat interval, seconds.
    #[arg(long, default_value_t = 30, env)]
    pub sse_heartbeat_secs: u64,

    /// WebSocket ping interval, seconds.
    #[arg(long, default_value_t = 30, env)]
    pub ws_ping_secs: u64,

    /// Default notification expiry, days (used when an event type doesn't
    /// set one explicitly).
    #[arg(long, default_value_t = 90, env)]
    pub default_expiry_days: i64,
}
