use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::mirror_checker::MirrorChecker;
use super::status::object_key;
use super::{ControllerContext, MonitorKey, ReconcileErr};
use crate::backend::PoolMirrorMode;
use crate::cluster::ClusterInfo;
use crate::crd::block_pool::CephBlockPool;
use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;

/// Bring backend mirroring and the monitor task in line with the desired
/// mirroring settings of `rns`.
#[instrument(skip_all, fields(pool_path = %rns.pool_path()))]
pub async fn reconcile_mirroring(
    ctx: &ControllerContext,
    rns: &CephBlockPoolRadosNamespace,
    pool: &CephBlockPool,
    cluster: &ClusterInfo,
) -> Result<(), ReconcileErr> {
    let pool_path = rns.pool_path();
    let key = MonitorKey::for_namespace(rns);
    let monitoring_suppressed =
        pool.mirror_monitoring_disabled() || !ctx.cfg.monitoring_enabled();

    let mirror_info = ctx
        .backend
        .mirroring_info(cluster, &pool_path)
        .await
        .map_err(|source| ReconcileErr::Backend {
            op: "get mirroring info",
            source,
        })?;

    if let Some(mirroring) = rns.spec.mirroring.as_ref() {
        if !pool.mirroring_enabled() {
            return Err(ReconcileErr::Mirroring(format!(
                "mirroring is disabled for block pool {:?}, cannot enable mirroring for rados namespace {pool_path:?}",
                pool.name_any()
            )));
        }

        ctx.backend
            .enable_mirroring(
                cluster,
                &pool_path,
                mirroring.remote_namespace.as_deref(),
                mirroring.mode,
            )
            .await
            .map_err(|source| ReconcileErr::Backend {
                op: "enable rbd rados namespace mirroring",
                source,
            })?;

        ctx.backend
            .enable_snapshot_schedules(cluster, &pool_path, &mirroring.snapshot_schedules)
            .await
            .map_err(|source| ReconcileErr::Backend {
                op: "enable snapshot scheduling",
                source,
            })?;

        if !monitoring_suppressed {
            let checker = MirrorChecker {
                store: ctx.store.clone(),
                backend: ctx.backend.clone(),
                clock: ctx.clock.clone(),
                cluster: cluster.clone(),
                key: object_key(rns),
                pool_path: pool_path.clone(),
                interval: pool
                    .mirror_check_interval()
                    .unwrap_or_else(|| ctx.cfg.requeue.mirror_interval()),
            };
            ctx.monitors.start(&key, move |token| checker.run(token));
        }
    } else if !mirror_info.mode.is_disabled() {
        if mirror_info.mode == PoolMirrorMode::Image {
            let images = ctx
                .backend
                .list_mirrored_images(cluster, &pool_path)
                .await
                .map_err(|source| ReconcileErr::Backend {
                    op: "list mirrored images",
                    source,
                })?;
            if !images.is_empty() {
                return Err(ReconcileErr::Mirroring(format!(
                    "there are {} mirrored images in the rados namespace {pool_path:?}, disable mirroring for each image manually",
                    images.len()
                )));
            }
        }

        ctx.backend
            .disable_mirroring(cluster, &pool_path)
            .await
            .map_err(|source| ReconcileErr::Backend {
                op: "disable rbd rados namespace mirroring",
                source,
            })?;
        info!(%pool_path, "mirroring disabled");
        ctx.monitors.stop(&key);
    }

    if monitoring_suppressed && ctx.monitors.is_running(&key) {
        debug!(%key, "mirror monitoring disabled");
        ctx.monitors.stop(&key);
        ctx.store
            .update_mirroring_status(&object_key(rns), None)
            .await?;
    }

    Ok(())
}
