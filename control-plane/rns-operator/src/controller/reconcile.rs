use kube::ResourceExt;
use tracing::{debug, info, instrument, trace};

use super::cluster::check_cluster;
use super::deletion::reconcile_deletion;
use super::mirroring::reconcile_mirroring;
use super::status::{cluster_id, update_phase};
use super::{ControllerContext, MonitorKey, Outcome, ReconcileErr, finalizer};
use crate::cluster::{CephVersion, ClusterInfo};
use crate::crd::ceph_cluster::CephCluster;
use crate::crd::rados_namespace::{CephBlockPoolRadosNamespace, NamespacePhase};
use crate::csi::CsiClusterConfigEntry;
use crate::store::ObjectKey;

/// One pass of the reconcile ladder for the record at `key`. Guards run in
/// order and the first one that matches decides the outcome.
#[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
pub async fn reconcile_namespace(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<Outcome, ReconcileErr> {
    let Some(rns) = ctx.store.get_namespace(key).await? else {
        debug!("rados namespace not found, must have been deleted");
        return Ok(Outcome::NoOp);
    };

    if !rns.is_deleting() && finalizer::ensure_present(ctx.store.as_ref(), &rns).await? {
        info!("requeue after adding finalizer");
        return Ok(Outcome::RequeueImmediate);
    }

    if rns.status.is_none() {
        update_phase(ctx, &rns, NamespacePhase::Progressing).await;
    }

    let gate = check_cluster(ctx, &key.namespace).await?;
    let cluster = match gate.cluster {
        Some(cluster) if gate.ready => cluster,
        _ => {
            if rns.is_deleting() && !gate.exists {
                info!("CephCluster is gone, removing finalizer without cleanup");
                ctx.monitors.stop(&MonitorKey::for_namespace(&rns));
                finalizer::remove(ctx.store.as_ref(), &rns).await?;
                return Ok(Outcome::NoOp);
            }
            return Ok(gate.directive);
        }
    };

    // rebuilt every pass, mons and settings may have moved
    let mut cluster_info = ctx.store.load_cluster_info(&cluster).await?;

    if rns.is_deleting() {
        return reconcile_deletion(ctx, &rns, &cluster, &cluster_info).await;
    }

    if cluster.is_external() {
        debug!("external cluster, skipping rados namespace creation");
        project_config(ctx, &rns, &cluster_info).await?;
        update_phase(ctx, &rns, NamespacePhase::Ready).await;
        register_client_profile(ctx, &rns, &cluster, &cluster_info).await?;
        return Ok(Outcome::NoOp);
    }

    if rns.spec.mirroring.is_some() {
        cluster_info.ceph_version = Some(resolve_version(&cluster)?);
    }

    let pool_key = ObjectKey::new(&key.namespace, &rns.spec.block_pool_name);
    let Some(pool) = ctx.store.get_block_pool(&pool_key).await? else {
        return Err(ReconcileErr::ParentNotFound {
            pool: rns.spec.block_pool_name.clone(),
            name: rns.name_any(),
        });
    };
    if !pool.is_ready() {
        debug!(pool = %pool_key.name, "block pool not ready yet");
        return Ok(Outcome::RequeueAfter(ctx.cfg.requeue.pool_not_ready()));
    }

    if let Some(outcome) = create_or_update(ctx, &rns, &cluster_info).await? {
        return Ok(outcome);
    }

    project_config(ctx, &rns, &cluster_info).await?;

    reconcile_mirroring(ctx, &rns, &pool, &cluster_info).await?;

    update_phase(ctx, &rns, NamespacePhase::Ready).await;
    register_client_profile(ctx, &rns, &cluster, &cluster_info).await?;

    trace!("rados namespace reconciled");
    Ok(Outcome::NoOp)
}

fn resolve_version(cluster: &CephCluster) -> Result<CephVersion, ReconcileErr> {
    Ok(CephVersion::from_cluster(cluster)?)
}

/// Ensure the backend namespace exists. `Some` carries a wait directive for
/// the uninitialized backend case.
async fn create_or_update(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    cluster: &ClusterInfo,
) -> Result<Option<Outcome>, ReconcileErr> {
    let name = rns.rados_namespace_name();
    if name.is_empty() {
        debug!(pool = %rns.spec.block_pool_name, "implicit rados namespace already exists");
        return Ok(None);
    }
    info!(pool = %rns.spec.block_pool_name, rados_namespace = %name, "creating rados namespace");
    match ctx
        .backend
        .create_namespace(cluster, &rns.spec.block_pool_name, &name)
        .await
    {
        Ok(()) => Ok(None),
        Err(e) if e.is_uninitialized() => {
            info!("operator not initialized yet, waiting");
            Ok(Some(Outcome::RequeueAfter(
                ctx.cfg.requeue.operator_not_initialized(),
            )))
        }
        Err(source) => {
            update_phase(ctx, rns, NamespacePhase::Failure).await;
            Err(ReconcileErr::Backend {
                op: "create rados namespace",
                source,
            })
        }
    }
}

async fn project_config(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    cluster: &ClusterInfo,
) -> Result<(), ReconcileErr> {
    let entry =
        CsiClusterConfigEntry::for_rados_namespace(cluster, &rns.rados_namespace_name());
    ctx.projection
        .save_cluster_config(&cluster_id(ctx, rns), &cluster.namespace, cluster, Some(entry))
        .await
        .map_err(ReconcileErr::ConfigProjection)
}

async fn register_client_profile(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    cluster: &CephCluster,
    info: &ClusterInfo,
) -> Result<(), ReconcileErr> {
    if !ctx.cfg.csi_operator_enabled() {
        return Ok(());
    }
    ctx.profiles
        .create_or_update(
            info,
            &rns.rados_namespace_name(),
            &cluster_id(ctx, rns),
            &cluster.name_any(),
        )
        .await
        .map_err(ReconcileErr::ClientProfile)
}
