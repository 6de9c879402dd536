use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::status::{cluster_id, deletion_blocked_condition, object_key, update_phase};
use super::{ControllerContext, MonitorKey, Outcome, ReconcileErr, finalizer};
use crate::cleanup::CleanupRequest;
use crate::cluster::ClusterInfo;
use crate::crd::ceph_cluster::CephCluster;
use crate::crd::rados_namespace::{CephBlockPoolRadosNamespace, NamespacePhase};

enum DeleteResult {
    Deleted,
    Blocked,
    NotInitialized,
}

/// Deletion branch of the reconcile ladder. Only the last record pointing
/// at a backend namespace checks emptiness; duplicates release their
/// finalizer directly.
#[instrument(skip_all, fields(ns = %rns.namespace().unwrap_or_default(), name = %rns.name_any()))]
pub async fn reconcile_deletion(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    cluster: &CephCluster,
    info: &ClusterInfo,
) -> Result<Outcome, ReconcileErr> {
    let ns = rns.namespace().unwrap_or_default();
    let siblings = ctx
        .store
        .list_namespaces_by_index(&ns, &rns.index_key())
        .await?;
    // zero records (a racing delete) counts as the last survivor
    let last_record = siblings.len() <= 1;

    if cluster.is_external() {
        warn!(
            "deleting a rados namespace of an external cluster is not supported, delete it manually"
        );
    } else if last_record {
        match delete_from_backend(ctx, rns, cluster, info).await? {
            DeleteResult::Deleted => {}
            DeleteResult::Blocked => {
                return Ok(Outcome::RequeueAfter(
                    ctx.cfg.requeue.finalizer_blocked(),
                ));
            }
            DeleteResult::NotInitialized => {
                info!("operator not initialized yet, waiting");
                return Ok(Outcome::RequeueAfter(
                    ctx.cfg.requeue.operator_not_initialized(),
                ));
            }
        }
        ctx.monitors.stop(&MonitorKey::for_namespace(rns));
    } else {
        info!(
            count = siblings.len(),
            "other records share this rados namespace, removing finalizer without checking for data"
        );
    }

    if last_record {
        ctx.projection
            .save_cluster_config(&cluster_id(ctx, rns), &info.namespace, info, None)
            .await
            .map_err(ReconcileErr::ConfigProjection)?;
    }

    finalizer::remove(ctx.store.as_ref(), rns).await?;
    Ok(Outcome::NoOp)
}

async fn delete_from_backend(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    cluster: &CephCluster,
    info: &ClusterInfo,
) -> Result<DeleteResult, ReconcileErr> {
    let name = rns.rados_namespace_name();
    if name.is_empty() {
        debug!("implicit rados namespace, nothing to delete");
        return Ok(DeleteResult::Deleted);
    }

    let pool = &rns.spec.block_pool_name;
    let outcome = ctx.backend.delete_namespace(info, pool, &name).await;
    let contains_data = matches!(&outcome, Err(e) if e.contains_data());

    // diagnostic only; written whatever the delete call returned
    let condition =
        deletion_blocked_condition(contains_data, &rns.name_any(), ctx.clock.now());
    if let Some(msg) = condition.message.as_deref() {
        info!("{msg}");
    }
    if let Err(e) = ctx.store.update_condition(&object_key(rns), condition).await {
        warn!(error = %e, "failed to update deletion blocked condition");
    }

    if contains_data && rns.force_delete_requested() {
        info!(%pool, rados_namespace = %name, "force deletion requested, starting cleanup job");
        let req = CleanupRequest {
            namespace: rns.namespace().unwrap_or_default(),
            resource_name: rns.name_any(),
            resource_uid: rns.uid(),
            pool: pool.clone(),
            rados_namespace: name.clone(),
            cluster_name: cluster.name_any(),
        };
        ctx.jobs
            .start_job(&req)
            .await
            .map_err(|source| ReconcileErr::Cleanup {
                name: rns.name_any(),
                source,
            })?;
        // the job drains the namespace; stop polling a namespace about to vanish
        ctx.monitors.stop(&MonitorKey::for_namespace(rns));
    }

    match outcome {
        Ok(()) => {
            info!(%pool, rados_namespace = %name, "rados namespace deleted");
            Ok(DeleteResult::Deleted)
        }
        Err(_) if contains_data => Ok(DeleteResult::Blocked),
        Err(e) if e.is_uninitialized() => Ok(DeleteResult::NotInitialized),
        Err(source) => {
            update_phase(ctx, rns, NamespacePhase::Failure).await;
            Err(ReconcileErr::Backend {
                op: "delete rados namespace",
                source,
            })
        }
    }
}
