use tracing::debug;

use super::{ControllerContext, Outcome, ReconcileErr};
use crate::crd::ceph_cluster::{CLUSTER_PHASE_CONNECTED, CephCluster};

/// Result of the cluster readiness gate.
pub struct ClusterGate {
    pub cluster: Option<CephCluster>,
    pub ready: bool,
    pub exists: bool,
    /// What to return when not ready
    pub directive: Outcome,
}

/// Decide whether backend commands can be issued for records in `namespace`.
pub async fn check_cluster(
    ctx: &ControllerContext,
    namespace: &str,
) -> Result<ClusterGate, ReconcileErr> {
    let wait = Outcome::RequeueAfter(ctx.cfg.requeue.cluster_not_ready());
    let clusters = ctx.store.list_clusters(namespace).await?;
    let Some(cluster) = clusters.into_iter().next() else {
        debug!(%namespace, "no CephCluster found");
        return Ok(ClusterGate {
            cluster: None,
            ready: false,
            exists: false,
            directive: wait,
        });
    };

    let ready = if cluster.metadata.deletion_timestamp.is_some() {
        debug!(%namespace, "CephCluster is being deleted");
        false
    } else if cluster.is_external() {
        cluster.phase() == Some(CLUSTER_PHASE_CONNECTED)
    } else {
        cluster.has_ceph_status()
    };
    if !ready {
        debug!(%namespace, phase = ?cluster.phase(), "CephCluster not ready");
    }

    Ok(ClusterGate {
        cluster: Some(cluster),
        ready,
        exists: true,
        directive: if ready { Outcome::NoOp } else { wait },
    })
}
