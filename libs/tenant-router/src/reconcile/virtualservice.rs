//! Sub-reconcilers 4-7: per-tenant VirtualServices cloned from a discovered
//! template (spec §4.3 steps 4-7).

use crate::context::ReconcileCtx;
use crate::crd::{HeaderOperations, Headers, StringMatch, VirtualService};
use crate::model::{ConditionReason, ConditionType, TenantHostRecord};
use crate::queue::ReconcileOutcome;
use crate::reconcile::gateway::dedicated_gateway_name;
use crate::reconcile::status::{failure_condition, record_step, success_condition};

use kube::api::Api;
use kube::ResourceExt;
use std::time::Duration;
use tokio::time::Instant;
use tr_common::Result;

const FAILURE_REQUEUE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsKind {
    Admin,
    Storefront,
    StorefrontWww,
    Api,
}

impl VsKind {
    fn suffix(self) -> &'static str {
        match self {
            VsKind::Admin => "admin",
            VsKind::Storefront => "storefront",
            VsKind::StorefrontWww => "storefront-www",
            VsKind::Api => "api",
        }
    }

    fn condition_type(self) -> ConditionType {
        match self {
            VsKind::Admin => ConditionType::AdminVSConfigured,
            VsKind::Storefront => ConditionType::StorefrontVSConfigured,
            VsKind::StorefrontWww => ConditionType::StorefrontWwwVSConfigured,
            VsKind::Api => ConditionType::APIVSConfigured,
        }
    }

    fn template_name(self, ctx: &ReconcileCtx) -> String {
        match self {
            VsKind::Admin => ctx.config.admin_template_vs.clone(),
            VsKind::Storefront | VsKind::StorefrontWww => ctx.config.storefront_template_vs.clone(),
            VsKind::Api => ctx.config.api_template_vs.clone(),
        }
    }

    fn host(self, record: &TenantHostRecord) -> Option<String> {
        match self {
            VsKind::Admin => Some(record.admin_host.clone()),
            VsKind::Storefront => Some(record.storefront_host.clone()),
            VsKind::StorefrontWww => record.storefront_www_host.clone(),
            VsKind::Api => Some(record.api_host.clone()),
        }
    }

    fn already_patched(self, record: &TenantHostRecord) -> bool {
        match self {
            VsKind::Admin => record.admin_vs_patched,
            VsKind::Storefront => record.storefront_vs_patched,
            VsKind::StorefrontWww => record.storefront_www_vs_patched,
            VsKind::Api => record.api_vs_patched,
        }
    }
}

fn target_name(slug: &str, kind: VsKind) -> String {
    format!("{slug}-{}-vs", kind.suffix())
}

fn cors_origins(record: &TenantHostRecord, ctx: &ReconcileCtx) -> Vec<StringMatch> {
    vec![
        StringMatch {
            exact: format!("https://{}", record.admin_host),
        },
        StringMatch {
            exact: format!("https://{}", record.storefront_host),
        },
        StringMatch {
            exact: format!("https://dev-onboarding.{}", ctx.config.base_domain),
        },
    ]
}

async fn set_patched(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
    kind: VsKind,
    namespace: &str,
) -> Result<()> {
    match kind {
        VsKind::Admin => ctx.repository.set_admin_vs_patched(record.id, namespace).await,
        VsKind::Storefront => {
            ctx.repository
                .set_storefront_vs_patched(record.id, namespace)
                .await
        }
        VsKind::StorefrontWww => {
            ctx.repository
                .set_storefront_www_vs_patched(record.id, namespace)
                .await
        }
        VsKind::Api => ctx.repository.set_api_vs_patched(record.id, namespace).await,
    }
}

fn flag_column(kind: VsKind) -> &'static str {
    match kind {
        VsKind::Admin => "admin_vs_patched",
        VsKind::Storefront => "storefront_vs_patched",
        VsKind::StorefrontWww => "storefront_www_vs_patched",
        VsKind::Api => "api_vs_patched",
    }
}

fn namespace_of(record: &TenantHostRecord, kind: VsKind) -> Option<String> {
    match kind {
        VsKind::Admin => record.admin_vs_namespace.clone(),
        VsKind::Storefront => record.storefront_vs_namespace.clone(),
        VsKind::StorefrontWww => record.storefront_www_vs_namespace.clone(),
        VsKind::Api => record.api_vs_namespace.clone(),
    }
}

pub async fn ensure(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
    kind: VsKind,
) -> Result<ReconcileOutcome> {
    if kind == VsKind::StorefrontWww && record.storefront_www_host.is_none() {
        return Ok(ReconcileOutcome::done());
    }
    if kind.already_patched(record) {
        return Ok(ReconcileOutcome::done());
    }
    let Some(host) = kind.host(record) else {
        return Ok(ReconcileOutcome::done());
    };

    let started = Instant::now();
    let template_name = kind.template_name(ctx);
    let Some(template_ns) = ctx
        .namespaces
        .resolve::<VirtualService>(&ctx.client, &template_name, &ctx.config.ingress_candidates())
        .await
    else {
        ctx.metrics.failure_inc(&record.slug);
        record_step(
            ctx,
            record,
            failure_condition(
                kind.condition_type(),
                format!("template VirtualService {template_name} not found"),
            ),
            "VirtualService",
            "",
            started,
        )
        .await?;
        return Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE));
    };

    let template_api: Api<VirtualService> = Api::namespaced(ctx.client.clone(), &template_ns);
    let template = template_api.get(&template_name).await.map_err(tr_common::Error::from)?;

    let mut spec = template.spec.clone();
    spec.hosts = vec![host.clone()];

    if record.is_custom_domain {
        spec.gateways = vec![format!(
            "{}/{}",
            ctx.config.custom_domain_namespace,
            dedicated_gateway_name(&record.slug)
        )];
    }

    for route in spec.http.iter_mut() {
        if route.cors_policy.is_some() {
            route.cors_policy = route.cors_policy.take().map(|mut cors| {
                cors.allow_origins = cors_origins(record, ctx);
                cors
            });
        }
        let headers = route.headers.get_or_insert_with(|| Headers { request: None });
        let request = headers.request.get_or_insert_with(|| HeaderOperations {
            set: Default::default(),
        });
        request
            .set
            .insert("X-Vendor-ID".to_string(), record.tenant_id.clone());
        request
            .set
            .insert("X-Tenant-ID".to_string(), record.tenant_id.clone());
    }

    let name = target_name(&record.slug, kind);
    let mut cloned = VirtualService::new(&name, spec);
    cloned.annotations_mut().insert(
        "external-dns.alpha.kubernetes.io/cloudflare-proxied".to_string(),
        (!record.is_custom_domain).to_string(),
    );

    let target_api: Api<VirtualService> = Api::namespaced(ctx.client.clone(), &template_ns);
    match tr_k8s_util::apply::apply(&target_api, &name, &cloned).await {
        Ok(_) => {
            set_patched(ctx, record, kind, &template_ns).await?;
            record_step(
                ctx,
                record,
                success_condition(kind.condition_type(), ConditionReason::Provisioned),
                "VirtualService",
                &template_ns,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::done())
        }
        Err(e) if e.is_idempotent_success() => {
            set_patched(ctx, record, kind, &template_ns).await?;
            Ok(ReconcileOutcome::done())
        }
        Err(e) if e.is_retryable() => {
            ctx.metrics.failure_inc(&record.slug);
            record_step(
                ctx,
                record,
                failure_condition(kind.condition_type(), e.to_string()),
                "VirtualService",
                &template_ns,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE))
        }
        Err(e) => Err(e),
    }
}

pub async fn delete(ctx: &ReconcileCtx, record: &TenantHostRecord, kind: VsKind) -> Result<()> {
    if !kind.already_patched(record) {
        return Ok(());
    }
    let Some(namespace) = namespace_of(record, kind) else {
        return Ok(());
    };
    let api: Api<VirtualService> = Api::namespaced(ctx.client.clone(), &namespace);
    tr_k8s_util::apply::delete_if_exists(&api, &target_name(&record.slug, kind)).await?;
    ctx.repository.clear_flag(record.id, flag_column(kind)).await
}
