//! Condition model and activity-log plumbing shared by every sub-reconciler
//! (spec §4.3 "Condition model").

use crate::context::ReconcileCtx;
use crate::model::{Condition, ConditionReason, ConditionStatus, ConditionType, TenantHostRecord};

use tokio::time::Instant;
use tracing::{info, warn};
use tr_common::Result;

pub async fn record_step(
    ctx: &ReconcileCtx,
    record: &TenantHostRecord,
    condition: Condition,
    resource: &str,
    namespace: &str,
    started: Instant,
) -> Result<()> {
    let success = matches!(condition.status, ConditionStatus::True);
    if success {
        info!(
            msg = "sub-reconciler step complete",
            slug = %record.slug,
            condition_type = ?condition.type_,
            reason = ?condition.reason,
            resource,
            namespace,
        );
    } else {
        warn!(
            msg = "sub-reconciler step failed",
            slug = %record.slug,
            condition_type = ?condition.type_,
            reason = ?condition.reason,
            message = %condition.message,
            resource,
            namespace,
        );
    }

    ctx.repository
        .log_activity(
            record.id,
            &format!("{:?}", condition.type_),
            resource,
            namespace,
            success,
            (!success).then(|| condition.message.as_str()),
            started.elapsed().as_millis() as i64,
        )
        .await
}

pub fn ready_condition(record: &TenantHostRecord) -> Condition {
    if record.required_flags_satisfied() {
        Condition {
            type_: ConditionType::Ready,
            status: ConditionStatus::True,
            reason: ConditionReason::Provisioned,
            message: "all required resources are in place".to_string(),
        }
    } else {
        Condition {
            type_: ConditionType::Ready,
            status: ConditionStatus::False,
            reason: ConditionReason::Provisioning,
            message: "one or more required resources are not yet in place".to_string(),
        }
    }
}

pub fn failure_condition(type_: ConditionType, message: impl Into<String>) -> Condition {
    Condition {
        type_,
        status: ConditionStatus::False,
        reason: ConditionReason::Failed,
        message: message.into(),
    }
}

pub fn success_condition(type_: ConditionType, reason: ConditionReason) -> Condition {
    Condition {
        type_,
        status: ConditionStatus::True,
        reason,
        message: String::new(),
    }
}
