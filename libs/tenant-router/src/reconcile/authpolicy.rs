//! Sub-reconciler 8: shared authorization policy covering every
//! custom-domain tenant's hosts (spec §4.3 step 8).

use crate::context::ReconcileCtx;
use crate::crd::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, Operation, ToOperation,
    WorkloadSelector,
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

fn workload_selector(ctx: &ReconcileCtx) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    if let Some((key, value)) = ctx.config.workload_selector.split_once('=') {
        selector.insert(key.to_string(), value.to_string());
    }
    selector
}

/// Mutate `policy`'s single rule to include or exclude `hosts`, returning
/// whether anything changed.
fn union_hosts(policy: &mut AuthorizationPolicy, hosts: &[String], add: bool) -> bool {
    if policy.spec.rules.is_empty() {
        policy.spec.rules.push(AuthorizationRule {
            to: vec![ToOperation {
                operation: Operation { hosts: Vec::new() },
            }],
        });
    }
    let existing = &mut policy.spec.rules[0].to[0].operation.hosts;
    let before = existing.clone();
    if add {
        for host in hosts {
            if !existing.contains(host) {
                existing.push(host.clone());
            }
        }
    } else {
        existing.retain(|h| !hosts.contains(h));
    }
    *existing != before
}

pub async fn ensure(ctx: &ReconcileCtx, record: &TenantHostRecord) -> Result<ReconcileOutcome> {
    if !record.is_custom_domain {
        return Ok(ReconcileOutcome::done());
    }
    if record.auth_policy_patched {
        return Ok(ReconcileOutcome::done());
    }

    let started = Instant::now();
    let namespace = &ctx.config.custom_domain_namespace;
    let name = &ctx.config.shared_auth_policy_name;
    let api: Api<AuthorizationPolicy> = Api::namespaced(ctx.client.clone(), namespace);

    let mut policy = match tr_k8s_util::apply::get_optional(&api, name).await? {
        Some(existing) => existing,
        None => AuthorizationPolicy::new(
            name,
            AuthorizationPolicySpec {
                selector: Some(WorkloadSelector {
                    match_labels: workload_selector(ctx),
                }),
                action: "ALLOW".to_string(),
                rules: Vec::new(),
            },
        ),
    };

    union_hosts(&mut policy, &record.custom_domain_names(), true);

    match tr_k8s_util::apply::apply(&api, name, &policy).await {
        Ok(_) => {
            ctx.repository
                .set_auth_policy_patched(record.id, namespace)
                .await?;
            record_step(
                ctx,
                record,
                success_condition(ConditionType::AuthPolicyConfigured, ConditionReason::Provisioned),
                "AuthorizationPolicy",
                namespace,
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
                failure_condition(ConditionType::AuthPolicyConfigured, e.to_string()),
                "AuthorizationPolicy",
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
    if !record.auth_policy_patched {
        return Ok(());
    }
    let Some(namespace) = record.auth_policy_namespace.clone() else {
        return Ok(());
    };
    let name = &ctx.config.shared_auth_policy_name;
    let api: Api<AuthorizationPolicy> = Api::namespaced(ctx.client.clone(), &namespace);

    if let Some(mut policy) = tr_k8s_util::apply::get_optional(&api, name).await? {
        if union_hosts(&mut policy, &record.custom_domain_names(), false) {
            tr_k8s_util::apply::apply(&api, name, &policy).await?;
        }
    }

    ctx.repository.clear_flag(record.id, "auth_policy_patched").await
}
