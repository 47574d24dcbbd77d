//! Startup drift reconciliation (spec §4.3 "Startup drift reconciliation").
//!
//! Runs once after the worker pool starts, comparing the database's view of
//! in-progress tenants against what the cluster actually has.

use crate::context::ReconcileCtx;
use crate::crd::VirtualService;
use crate::model::TenantHostRecord;
use crate::queue::Queue;
use crate::reconcile::virtualservice::VsKind;

use kube::api::Api;
use std::sync::Arc;
use tr_common::Result;
use tracing::{info, warn};

async fn vs_exists(ctx: &ReconcileCtx, namespace: &str, name: &str) -> bool {
    let api: Api<VirtualService> = Api::namespaced(ctx.client.clone(), namespace);
    matches!(tr_k8s_util::apply::get_optional(&api, name).await, Ok(Some(_)))
}

fn vs_name(slug: &str, kind: VsKind) -> String {
    let suffix = match kind {
        VsKind::Admin => "admin",
        VsKind::Storefront => "storefront",
        VsKind::StorefrontWww => "storefront-www",
        VsKind::Api => "api",
    };
    format!("{slug}-{suffix}-vs")
}

async fn reconcile_flag(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
    kind: VsKind,
    flag: bool,
    namespace: Option<&str>,
    flag_column: &'static str,
) -> Result<bool> {
    let Some(namespace) = namespace else {
        return Ok(false);
    };
    let exists = vs_exists(ctx, namespace, &vs_name(&record.slug, kind)).await;

    if exists && !flag {
        match kind {
            VsKind::Admin => ctx.repository.set_admin_vs_patched(record.id, namespace).await?,
            VsKind::Storefront => {
                ctx.repository
                    .set_storefront_vs_patched(record.id, namespace)
                    .await?
            }
            VsKind::StorefrontWww => {
                ctx.repository
                    .set_storefront_www_vs_patched(record.id, namespace)
                    .await?
            }
            VsKind::Api => ctx.repository.set_api_vs_patched(record.id, namespace).await?,
        }
        ctx.metrics.drift_fixed_inc(flag_column);
        return Ok(true);
    }

    if !exists && flag {
        ctx.repository.clear_flag(record.id, flag_column).await?;
        ctx.metrics.drift_fixed_inc(flag_column);
        return Ok(true);
    }

    Ok(false)
}

/// Compare DB flags against live cluster state for one incomplete record
/// and repair whichever side is behind (cluster is the source of truth for
/// existence).
async fn repair_one(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<()> {
    let mut changed = false;
    changed |= reconcile_flag(
        ctx,
        record,
        VsKind::Admin,
        record.admin_vs_patched,
        record.admin_vs_namespace.as_deref(),
        "admin_vs_patched",
    )
    .await?;
    changed |= reconcile_flag(
        ctx,
        record,
        VsKind::Storefront,
        record.storefront_vs_patched,
        record.storefront_vs_namespace.as_deref(),
        "storefront_vs_patched",
    )
    .await?;
    if record.storefront_www_host.is_some() {
        changed |= reconcile_flag(
            ctx,
            record,
            VsKind::StorefrontWww,
            record.storefront_www_vs_patched,
            record.storefront_www_vs_namespace.as_deref(),
            "storefront_www_vs_patched",
        )
        .await?;
    }
    changed |= reconcile_flag(
        ctx,
        record,
        VsKind::Api,
        record.api_vs_patched,
        record.api_vs_namespace.as_deref(),
        "api_vs_patched",
    )
    .await?;

    if changed {
        info!(msg = "drift repaired for tenant", slug = %record.slug);
    }

    // Re-read and decide whether this now satisfies provisioning, or needs
    // to be requeued for the create pipeline to pick up the rest.
    let refreshed = ctx
        .repository
        .get_by_slug(&record.slug)
        .await?
        .unwrap_or_else(|| record.clone());

    if refreshed.required_flags_satisfied() {
        ctx.repository.mark_provisioned(refreshed.id).await?;
    }

    Ok(())
}

/// Scan `ListIncomplete`/`ListDeleting` once and either repair drift
/// in-place or requeue the slug for a full reconcile pass.
pub async fn run_once(ctx: &Arc<ReconcileCtx>, queue: &Arc<Queue>) -> Result<()> {
    let incomplete = ctx.repository.list_incomplete().await?;
    info!(msg = "startup drift scan found incomplete records", count = incomplete.len());
    for record in &incomplete {
        if record.status == crate::model::TenantStatus::Pending {
            enqueue_or_warn(queue, &record.slug).await;
            continue;
        }
        if let Err(e) = repair_one(ctx, record).await {
            warn!(msg = "drift repair failed, requeueing for full reconcile", slug = %record.slug, %e);
        }
        enqueue_or_warn(queue, &record.slug).await;
    }

    let deleting = ctx.repository.list_deleting().await?;
    info!(msg = "startup drift scan found stuck deletions", count = deleting.len());
    for record in &deleting {
        enqueue_or_warn(queue, &record.slug).await;
    }

    Ok(())
}

/// The startup drift scan runs once before the server starts accepting
/// traffic; a full queue here just means the scan outruns the workers, so
/// drop and log rather than fail the whole pass.
async fn enqueue_or_warn(queue: &Arc<Queue>, slug: &str) {
    if queue.enqueue(slug).await.is_err() {
        warn!(msg = "work queue full during startup drift scan, slug will be picked up on next sync", slug);
    }
}
