//! Orchestrates the ordered sub-reconciler pipeline (spec §4.3) behind the
//! [`crate::queue::Reconciler`] trait.

pub mod authpolicy;
pub mod certificate;
pub mod gateway;
pub mod oidc;
pub mod status;
pub mod virtualservice;

use crate::context::ReconcileCtx;
use crate::model::{TenantHostRecord, TenantStatus};
use crate::queue::{ReconcileOutcome, Reconciler};
use crate::reconcile::status::{record_step, success_condition};
use crate::reconcile::virtualservice::VsKind;

use std::sync::Arc;
use tokio::time::Instant;
use tr_common::Result;
use tracing::info;

pub struct TenantReconciler {
    ctx: Arc<ReconcileCtx>,
}

impl TenantReconciler {
    pub fn new(ctx: Arc<ReconcileCtx>) -> Self {
        Self { ctx }
    }
}

impl Reconciler for TenantReconciler {
    async fn reconcile(&self, slug: &str) -> Result<ReconcileOutcome> {
        let _measure = self.ctx.metrics.measure(slug);
        let Some(record) = self.ctx.repository.get_by_slug(slug).await? else {
            info!(msg = "reconcile triggered for unknown slug, nothing to do", slug);
            return Ok(ReconcileOutcome::done());
        };

        if record.status == TenantStatus::Deleting {
            return run_delete(&self.ctx, &record).await;
        }

        run_create_or_sync(&self.ctx, &record).await
    }

    /// Persist the terminal failure (spec §4.2 rule 3: "dropped after 5
    /// attempts; the record's DB row is marked failed with incremented
    /// retry_count and a last_error string").
    async fn on_exhausted(&self, slug: &str, error: &tr_common::Error) {
        match self.ctx.repository.get_by_slug(slug).await {
            Ok(Some(record)) => {
                if let Err(e) = self
                    .ctx
                    .repository
                    .record_failure(record.id, &error.to_string())
                    .await
                {
                    tracing::error!(msg = "failed to persist exhausted reconcile failure", slug, %e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(msg = "failed to look up record for exhausted reconcile", slug, %e);
            }
        }
    }
}

macro_rules! step {
    ($outcome:expr) => {
        match $outcome {
            outcome if outcome.requeue => return Ok(outcome),
            _ => {}
        }
    };
}

/// Run the ordered pipeline. Each step is a no-op when its flag is already
/// set, so re-entering mid-pipeline (sync, drift repair) converges.
pub async fn run_create_or_sync(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
) -> Result<ReconcileOutcome> {
    step!(certificate::ensure(ctx, record).await?);
    step!(gateway::ensure(ctx, record).await?);
    step!(virtualservice::ensure(ctx, record, VsKind::Admin).await?);
    step!(virtualservice::ensure(ctx, record, VsKind::Storefront).await?);
    step!(virtualservice::ensure(ctx, record, VsKind::StorefrontWww).await?);
    step!(virtualservice::ensure(ctx, record, VsKind::Api).await?);
    step!(authpolicy::ensure(ctx, record).await?);
    step!(oidc::ensure(ctx, record).await?);

    // Re-read: the steps above only mutate via `ctx.repository`, so refresh
    // the in-memory view before deciding whether to mark provisioned.
    let current = ctx
        .repository
        .get_by_slug(&record.slug)
        .await?
        .unwrap_or_else(|| record.clone());

    if current.required_flags_satisfied() {
        ctx.repository.mark_provisioned(current.id).await?;
        record_step(
            ctx,
            &current,
            success_condition(
                crate::model::ConditionType::Ready,
                crate::model::ConditionReason::Provisioned,
            ),
            "TenantHostRecord",
            "",
            Instant::now(),
        )
        .await?;
    }

    Ok(ReconcileOutcome::done())
}

/// Inverse of `run_create_or_sync`, executed in reverse step order
/// (spec §4.3 "Delete flow").
pub async fn run_delete(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<ReconcileOutcome> {
    authpolicy::delete(ctx, record).await?;
    virtualservice::delete(ctx, record, VsKind::Api).await?;
    virtualservice::delete(ctx, record, VsKind::StorefrontWww).await?;
    virtualservice::delete(ctx, record, VsKind::Storefront).await?;
    virtualservice::delete(ctx, record, VsKind::Admin).await?;
    gateway::delete(ctx, record).await?;
    certificate::delete(ctx, record).await?;
    oidc::delete(ctx, record).await?;

    ctx.repository.soft_delete(record.id).await?;
    info!(msg = "tenant host record deleted", slug = %record.slug);
    Ok(ReconcileOutcome::done())
}
