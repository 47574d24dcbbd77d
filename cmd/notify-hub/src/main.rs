use notify_hub::config::NotifyHubArgs;
use notify_hub::context::HubState;
use notify_hub::metrics::HubMetrics;
use notify_hub::repository::Repository;
use notify_hub::{http, CombinedResolver, TargetUserResolver};

use clap::{crate_authors, crate_description, crate_version, Parser};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tr_common::events::EventSubscriber;
use tr_common::identity::TicketValidator;
use tr_common::telemetry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Parser, Debug)]
#[command(
    name = "notify-hub",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    #[command(flatten)]
    inner: NotifyHubArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse().inner;

    telemetry::init(
        &args.common.log_filter,
        args.common.log_format,
        args.common.tracing_url.as_deref(),
        args.common.sample_ratio,
    )
    .await?;

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
    opentelemetry::global::set_meter_provider(provider.clone());
    let meter = opentelemetry::global::meter("notify-hub");
    let metrics = HubMetrics::new(&meter);

    let repository = Repository::new(args.common.connect_db().await?);

    let ws_registry = Arc::new(notify_hub::ClientRegistry::new());
    let sse_registry = Arc::new(notify_hub::ClientRegistry::new());
    let resolver: Arc<dyn TargetUserResolver> =
        Arc::new(CombinedResolver::new(ws_registry.clone(), sse_registry.clone()));

    let cancel = CancellationToken::new();

    let nats = args.common.connect_stream().await?;
    let subscriber = EventSubscriber::new(nats);
    {
        let repository = repository.clone();
        let resolver = resolver.clone();
        let ws_registry = ws_registry.clone();
        let sse_registry = sse_registry.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            notify_hub::events::run(subscriber, repository, resolver, ws_registry, sse_registry, metrics, cancel)
                .await;
        });
    }

    {
        let repository = repository.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match repository.sweep_expired().await {
                            Ok(count) if count > 0 => tracing::info!(msg = "swept expired notifications", count),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(msg = "expiry sweep failed", %e),
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    let port = args.common.port;
    let state = HubState {
        repository,
        ws_registry: ws_registry.clone(),
        sse_registry: sse_registry.clone(),
        ticket_validator: Arc::new(TicketValidator::new(args.ticket_validation_endpoint.clone())),
        client_channel_capacity: args.client_channel_capacity,
        ws_ping_secs: args.ws_ping_secs,
        sse_heartbeat_secs: args.sse_heartbeat_secs,
    };

    let app = http::router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel, ws_registry, sse_registry))
        .await?;

    Ok(())
}

async fn shutdown_signal(
    cancel: CancellationToken,
    ws_registry: Arc<notify_hub::ClientRegistry<notify_hub::wire::ServerMessage>>,
    sse_registry: Arc<notify_hub::ClientRegistry<notify_hub::wire::ServerMessage>>,
) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    cancel.cancel();
    ws_registry.shutdown();
    sse_registry.shutdown();
}
