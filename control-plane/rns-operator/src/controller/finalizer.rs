use kube::ResourceExt;
use tracing::{debug, info};

use super::ReconcileErr;
use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;
use crate::store::{ObjectKey, ResourceStore};

pub const FINALIZER: &str = "cephblockpoolradosnamespace.ceph.rook.io";

pub fn has_finalizer(rns: &CephBlockPoolRadosNamespace) -> bool {
    rns.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer when missing. Returns `true` when the record changed;
/// the caller must requeue instead of working on the stale copy.
pub async fn ensure_present(
    store: &dyn ResourceStore,
    rns: &CephBlockPoolRadosNamespace,
) -> Result<bool, ReconcileErr> {
    if has_finalizer(rns) {
        return Ok(false);
    }
    let key = ObjectKey::new(rns.namespace().unwrap_or_default(), rns.name_any());
    let mut finalizers = rns.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    store
        .set_finalizers(&key, finalizers)
        .await
        .map_err(ReconcileErr::Finalizer)?;
    info!(ns = %key.namespace, name = %key.name, "finalizer added");
    Ok(true)
}

pub async fn remove(
    store: &dyn ResourceStore,
    rns: &CephBlockPoolRadosNamespace,
) -> Result<(), ReconcileErr> {
    if !has_finalizer(rns) {
        debug!(name = %rns.name_any(), "finalizer already absent");
        return Ok(());
    }
    let key = ObjectKey::new(rns.namespace().unwrap_or_default(), rns.name_any());
    let finalizers: Vec<String> = rns
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    store
        .set_finalizers(&key, finalizers)
        .await
        .map_err(ReconcileErr::Finalizer)?;
    info!(ns = %key.namespace, name = %key.name, "finalizer removed");
    Ok(())
}
