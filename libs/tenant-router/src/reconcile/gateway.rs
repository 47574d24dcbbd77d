//! Sub-reconciler 3: Gateway (spec §4.3 step 3).
//!
//! Three placements depending on domain type and wildcard-cert mode:
//! custom-domain tenants get a dedicated Gateway plus a dedicated
//! AuthorizationPolicy binding the same hosts; default-domain tenants with
//! wildcard-cert mode on write nothing; default-domain tenants with it off
//! get one HTTPS server appended to the shared Gateway per host.

use crate::context::ReconcileCtx;
use crate::crd::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, Gateway, GatewayPort,
    GatewayServer, GatewaySpec, GatewayTls, Operation, ToOperation, WorkloadSelector,
};
use crate::model::{ConditionReason, ConditionType, TenantHostRecord};
use crate::queue::ReconcileOutcome;
use crate::reconcile::status::{failure_condition, record_step, success_condition};

use kube::api::Api;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tr_common::Result;

const FAILURE_REQUEUE: Duration = Duration::from_secs(30);
const WILDCARD_NAMESPACE_TAG: &str = "wildcard";

pub(crate) fn dedicated_gateway_name(slug: &str) -> String {
    format!("{slug}-gateway")
}

fn dedicated_auth_policy_name(slug: &str) -> String {
    format!("{slug}-ingress-ap")
}

fn workload_selector(ctx: &ReconcileCtx) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    if let Some((key, value)) = ctx.config.workload_selector.split_once('=') {
        selector.insert(key.to_string(), value.to_string());
    }
    selector
}

async fn ensure_custom_domain(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
) -> Result<ReconcileOutcome> {
    let started = Instant::now();
    let namespace = &ctx.config.custom_domain_namespace;
    let hosts = record.custom_domain_names();
    let gateway_name = dedicated_gateway_name(&record.slug);

    let gateway = Gateway::new(
        &gateway_name,
        GatewaySpec {
            selector: workload_selector(ctx),
            servers: vec![GatewayServer {
                port: GatewayPort {
                    number: 443,
                    name: "https".to_string(),
                    protocol: "HTTPS".to_string(),
                },
                hosts: hosts.clone(),
                tls: Some(GatewayTls {
                    mode: "SIMPLE".to_string(),
                    credential_name: Some(record.cert_name.clone()),
                }),
            }],
        },
    );

    let gw_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
    if let Err(e) = tr_k8s_util::apply::apply(&gw_api, &gateway_name, &gateway).await {
        if !e.is_idempotent_success() {
            if e.is_retryable() {
                ctx.metrics.failure_inc(&record.slug);
                record_step(
                    ctx,
                    record,
                    failure_condition(ConditionType::GatewayConfigured, e.to_string()),
                    "Gateway",
                    namespace,
                    started,
                )
                .await?;
                return Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE));
            }
            return Err(e);
        }
    }

    let ap_name = dedicated_auth_policy_name(&record.slug);
    let auth_policy = AuthorizationPolicy::new(
        &ap_name,
        AuthorizationPolicySpec {
            selector: Some(WorkloadSelector {
                match_labels: workload_selector(ctx),
            }),
            action: "ALLOW".to_string(),
            rules: vec![AuthorizationRule {
                to: vec![ToOperation {
                    operation: Operation { hosts },
                }],
            }],
        },
    );
    let ap_api: Api<AuthorizationPolicy> = Api::namespaced(ctx.client.clone(), namespace);
    if let Err(e) = tr_k8s_util::apply::apply(&ap_api, &ap_name, &auth_policy).await {
        if !e.is_idempotent_success() {
            if e.is_retryable() {
                ctx.metrics.failure_inc(&record.slug);
                return Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE));
            }
            return Err(e);
        }
    }

    ctx.repository
        .set_gateway_patched(record.id, namespace)
        .await?;
    record_step(
        ctx,
        record,
        success_condition(ConditionType::GatewayConfigured, ConditionReason::Provisioned),
        "Gateway",
        namespace,
        started,
    )
    .await?;
    Ok(ReconcileOutcome::done())
}

async fn ensure_shared_gateway(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
) -> Result<ReconcileOutcome> {
    let started = Instant::now();
    let name = &ctx.config.shared_gateway_name;
    let namespace = ctx
        .namespaces
        .resolve::<Gateway>(&ctx.client, name, &ctx.config.ingress_candidates())
        .await
        .ok_or_else(|| tr_common::Error::NotFound(format!("shared gateway {name} not found")))?;

    let api: Api<Gateway> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut gateway = api.get(name).await.map_err(tr_common::Error::from)?;

    let existing_hosts: std::collections::HashSet<String> = gateway
        .spec
        .servers
        .iter()
        .flat_map(|s| s.hosts.iter().cloned())
        .collect();

    for host in record.default_domain_hosts() {
        if existing_hosts.contains(host) {
            continue;
        }
        gateway.spec.servers.push(GatewayServer {
            port: GatewayPort {
                number: 443,
                name: format!("https-{host}").replace(['.', '_'], "-"),
                protocol: "HTTPS".to_string(),
            },
            hosts: vec![host.to_string()],
            tls: Some(GatewayTls {
                mode: "SIMPLE".to_string(),
                credential_name: Some(ctx.config.wildcard_credential.clone()),
            }),
        });
    }

    match tr_k8s_util::apply::apply(&api, name, &gateway).await {
        Ok(_) => {
            ctx.repository
                .set_gateway_patched(record.id, &namespace)
                .await?;
            record_step(
                ctx,
                record,
                success_condition(ConditionType::GatewayConfigured, ConditionReason::Provisioned),
                "Gateway",
                &namespace,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::done())
        }
        Err(e) if e.is_retryable() => {
            ctx.metrics.failure_inc(&record.slug);
            record_step(
                ctx,
                record,
                failure_condition(ConditionType::GatewayConfigured, e.to_string()),
                "Gateway",
                &namespace,
                started,
            )
            .await?;
            Ok(ReconcileOutcome::requeue_after(FAILURE_REQUEUE))
        }
        Err(e) => Err(e),
    }
}

pub async fn ensure(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<ReconcileOutcome> {
    if record.gateway_patched {
        return Ok(ReconcileOutcome::done());
    }

    if record.is_custom_domain {
        return ensure_custom_domain(ctx, record).await;
    }

    if ctx.config.wildcard_cert_mode {
        ctx.repository
            .set_gateway_patched(record.id, WILDCARD_NAMESPACE_TAG)
            .await?;
        return Ok(ReconcileOutcome::done());
    }

    ensure_shared_gateway(ctx, record).await
}

pub async fn delete(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<()> {
    if !record.gateway_patched {
        return Ok(());
    }

    if record.is_custom_domain {
        let namespace = &ctx.config.custom_domain_namespace;
        let gw_api: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
        tr_k8s_util::apply::delete_if_exists(&gw_api, &dedicated_gateway_name(&record.slug))
            .await?;
        let ap_api: Api<AuthorizationPolicy> = Api::namespaced(ctx.client.clone(), namespace);
        tr_k8s_util::apply::delete_if_exists(&ap_api, &dedicated_auth_policy_name(&record.slug))
            .await?;
    } else if record.gateway_namespace.as_deref() != Some(WILDCARD_NAMESPACE_TAG) {
        if let Some(namespace) = &record.gateway_namespace {
            let name = &ctx.config.shared_gateway_name;
            let api: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
            if let Ok(mut gateway) = api.get(name).await {
                let hosts_to_remove: std::collections::HashSet<&str> =
                    record.default_domain_hosts().into_iter().collect();
                gateway
                    .spec
                    .servers
                    .retain(|s| !s.hosts.iter().any(|h| hosts_to_remove.contains(h.as_str())));
                tr_k8s_util::apply::apply(&api, name, &gateway).await?;
            }
        }
    }

    ctx.repository.clear_flag(record.id, "gateway_patched").await
}
