//! Sub-reconciler 2: TLS certificate (spec §4.3 step 2).

use crate::context::ReconcileCtx;
use crate::crd::{Certificate, CertificateSpec, IssuerRef};
use crate::model::{ConditionReason, ConditionType, TenantHostRecord};
use crate::queue::ReconcileOutcome;
use crate::reconcile::status::{failure_condition, record_step, success_condition};

use kube::api::Api;
use std::time::Duration;
use tokio::time::Instant;
use tr_common::Result;

const FAILURE_REQUEUE: Duration = Duration::from_secs(30);

fn placement(ctx: &ReconcileCtx, record: &TenantHostRecord) -> (&str, &str, Vec<String>) {
    if record.is_custom_domain {
        (
            ctx.config.custom_domain_namespace.as_str(),
            ctx.config.cluster_issuer_http01.as_str(),
            record.custom_domain_names(),
        )
    } else {
        (
            ctx.config.default_cert_namespace.as_str(),
            ctx.config.cluster_issuer_default.as_str(),
            record
                .default_domain_hosts()
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }
}

pub async fn ensure(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<ReconcileOutcome> {
    if record.certificate_created {
        return Ok(ReconcileOutcome::done());
    }
    let started = Instant::now();
    let (namespace, issuer, dns_names) = placement(ctx, record);

    let certificate = Certificate::new(
        &record.cert_name,
        CertificateSpec {
            secret_name: record.cert_name.clone(),
            dns_names,
            issuer_ref: IssuerRef {
                name: issuer.to_string(),
                kind: "ClusterIssuer".to_string(),
            },
        },
    );

    let api: Api<Certificate> = Api::namespaced(ctx.client.clone(), namespace);
    match tr_k8s_util::apply::apply(&api, &record.cert_name, &certificate).await {
        Ok(_) => {
            ctx.repository
                .set_certificate_created(record.id, namespace)
                .await?;
            record_step(
                ctx,
                record,
                success_condition(ConditionType::CertificateReady, ConditionReason::Provisioned),
                "Certificate",
                namespace,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::done())
        }
        Err(e) if e.is_idempotent_success() => {
            ctx.repository
                .set_certificate_created(record.id, namespace)
                .await?;
            Ok(ReconcileOutcome::done())
        }
        Err(e) if e.is_retryable() => {
            ctx.metrics.failure_inc(&record.slug);
            record_step(
                ctx,
                record,
                failure_condition(ConditionType::CertificateReady, e.to_string()),
                "Certificate",
                namespace,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE))
        }
        Err(e) => Err(e),
    }
}

pub async fn delete(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<()> {
    if !record.certificate_created {
        return Ok(());
    }
    let namespace = record
        .certificate_namespace
        .clone()
        .unwrap_or_else(|| placement(ctx, record).0.to_string());

    let api: Api<Certificate> = Api::namespaced(ctx.client.clone(), &namespace);
    match tr_k8s_util::apply::delete_if_exists(&api, &record.cert_name).await {
        Ok(()) => {}
        Err(e) if e.is_idempotent_success() => {}
        Err(e) => return Err(e),
    }
    ctx.repository
        .clear_flag(record.id, "certificate_created")
        .await
}
