use tenant_router::config::TenantRouterArgs;
use tenant_router::crd::{AuthorizationPolicy, Certificate, Gateway, VirtualService};
use tenant_router::http::{router, HttpState};
use tenant_router::metrics::ReconcilerMetrics;
use tenant_router::repository::Repository;
use tenant_router::{queue, ReconcileCtx, TenantReconciler};

use clap::{crate_authors, crate_description, crate_version, Parser};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tr_common::events::EventSubscriber;
use tr_common::telemetry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Parser, Debug)]
#[command(
    name = "tenant-router",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    #[command(flatten)]
    inner: TenantRouterArgs,
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
    let meter = opentelemetry::global::meter("tenant-router");

    let kube_config = kube::Config::infer().await?;
    let client = tr_k8s_util::client::new_client(kube_config).await?;
    tr_k8s_util::client::check_api_queryable::<Certificate>(&client).await;
    tr_k8s_util::client::check_api_queryable::<Gateway>(&client).await;
    tr_k8s_util::client::check_api_queryable::<VirtualService>(&client).await;
    tr_k8s_util::client::check_api_queryable::<AuthorizationPolicy>(&client).await;

    let pool = args.common.connect_db().await?;
    let repository = Repository::new(pool);
    let metrics = ReconcilerMetrics::new(&meter);

    let port = args.common.port;
    let ctx = ReconcileCtx::new(client, repository.clone(), metrics, args);
    let reconciler = Arc::new(TenantReconciler::new(ctx.clone()));

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let queue = queue::spawn(
        reconciler,
        ctx.limiter.clone(),
        ctx.config.workers,
        cancel.clone(),
        &mut tasks,
    );

    if let Err(e) = tenant_router::drift::run_once(&ctx, &queue).await {
        tracing::warn!(msg = "startup drift reconciliation failed", %e);
    }

    let nats = ctx.config.common.connect_stream().await?;
    let subscriber = EventSubscriber::new(nats);
    let events_cancel = cancel.clone();
    let events_repository = repository.clone();
    let events_queue = queue.clone();
    tasks.spawn(async move {
        if let Err(e) = tenant_router::events::run(subscriber, events_repository, events_queue, events_cancel).await {
            tracing::error!(msg = "event subscriber loop exited with error", %e);
        }
    });

    {
        let repository = repository.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let mut ticker = interval_at(Instant::now() + SWEEP_INITIAL_DELAY, SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match repository.sweep_expired().await {
                            Ok(count) if count > 0 => tracing::info!(msg = "swept expired tenant host records", count),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(msg = "tenant host retention sweep failed", %e),
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    let state = HttpState { ctx: ctx.clone(), queue: queue.clone() };
    let app = router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(cancel.clone()));

    tokio::select! {
        result = server => result?,
        _ = async { while tasks.join_next().await.is_some() {} } => {}
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    cancel.cancel();
}
