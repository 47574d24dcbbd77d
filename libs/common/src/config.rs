use crate::telemetry::LogFormat;

use clap::Parser;

/// Flags shared by both binaries: logging, tracing, Postgres, and the event stream.
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env)]
    pub log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    /// URL for the OpenTelemetry tracing endpoint. If unset, tracing export is disabled.
    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    pub tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(long, default_value_t = 0.1, env)]
    pub sample_ratio: f64,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of pooled database connections.
    #[arg(long, default_value_t = 10, env)]
    pub database_max_connections: u32,

    /// Event stream (JetStream-compatible) connection URL.
    #[arg(long, default_value = "nats://localhost:4222", env)]
    pub stream_url: String,

    /// Listen on given port for the HTTP surface.
    #[arg(short, long, default_value_t = 8080, env)]
    pub port: u16,
}

impl CommonArgs {
    pub async fn connect_db(&self) -> anyhow::Result<sqlx::PgPool> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(self.database_max_connections)
            .connect(&self.database_url)
            .await?;
        Ok(pool)
    }

    pub async fn connect_stream(&self) -> anyhow::Result<async_nats::Client> {
        // Unlimited reconnects, 2s base wait, 8 MiB buffer for in-flight
        // publishes (spec §4.1 failure semantics). Reconnects are logged but
        // never fatal.
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|attempts| {
                std::time::Duration::from_secs(2) * (attempts.max(1) as u32).min(1)
            })
            .reconnect_buffer_size(8 * 1024 * 1024)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => {
                        tracing::warn!(msg = "event stream connection lost, reconnecting")
                    }
                    async_nats::Event::Connected => {
                        tracing::info!(msg = "event stream connection established")
                    }
                    other => tracing::debug!(msg = "event stream connection event", ?other),
                }
            })
            .connect(&self.stream_url)
            .await?;
        Ok(client)
    }
}
