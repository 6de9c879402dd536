use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, warn};

use super::ControllerContext;
use crate::crd::rados_namespace::{CephBlockPoolRadosNamespace, NamespacePhase};
use crate::crd::{Condition, ConditionStatus, ConditionType};
use crate::csi::cluster_id_source;
use crate::store::{ObjectKey, StoreError};

pub const CLUSTER_ID_INFO_KEY: &str = "clusterID";
pub const REASON_NOT_EMPTY: &str = "RadosNamespaceNotEmpty";
pub const REASON_EMPTY: &str = "RadosNamespaceEmpty";

pub fn object_key(rns: &CephBlockPoolRadosNamespace) -> ObjectKey {
    ObjectKey::new(rns.namespace().unwrap_or_default(), rns.name_any())
}

pub fn cluster_id(ctx: &ControllerContext, rns: &CephBlockPoolRadosNamespace) -> String {
    (ctx.hasher)(&cluster_id_source(rns))
}

pub fn status_info(cluster_id: String) -> BTreeMap<String, String> {
    [(CLUSTER_ID_INFO_KEY.to_string(), cluster_id)]
        .into_iter()
        .collect()
}

/// Persist phase and info. Failures are logged; the next pass rewrites
/// the status anyway.
pub async fn update_phase(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    phase: NamespacePhase,
) {
    let key = object_key(rns);
    let info = status_info(cluster_id(ctx, rns));
    match ctx
        .store
        .update_status(&key, phase, info, rns.metadata.generation)
        .await
    {
        Ok(()) => debug!(%key, %phase, "status updated"),
        Err(StoreError::NotFound(_)) => {
            debug!(%key, "record gone before status update")
        }
        Err(e) => warn!(%key, %phase, error = %e, "failed to update status"),
    }
}

pub fn deletion_blocked_condition(
    blocked: bool,
    name: &str,
    now: DateTime<Utc>,
) -> Condition {
    let ts = now.to_rfc3339();
    let (status, reason, message) = if blocked {
        (
            ConditionStatus::True,
            REASON_NOT_EMPTY,
            format!("rados namespace {name:?} contains images or snapshots and cannot be deleted"),
        )
    } else {
        (
            ConditionStatus::False,
            REASON_EMPTY,
            format!("rados namespace {name:?} is empty and can be deleted"),
        )
    };
    Condition {
        type_: ConditionType::DeletionIsBlocked,
        status,
        reason: Some(reason.to_string()),
        message: Some(message),
        last_heartbeat_time: Some(ts.clone()),
        last_transition_time: Some(ts),
    }
}
