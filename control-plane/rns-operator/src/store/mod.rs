//! Resource store capability: typed access to the Kubernetes records the
//! reconciler reads and the status fields it writes.

mod kube_store;

pub use kube_store::KubeStore;

use async_trait::async_trait;

use crate::cluster::ClusterInfo;
use crate::crd::Condition;
use crate::crd::block_pool::CephBlockPool;
use crate::crd::ceph_cluster::CephCluster;
use crate::crd::rados_namespace::{
    CephBlockPoolRadosNamespace, MirroringStatus, NamespacePhase,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Namespace + name of a namespaced record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_namespace(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPoolRadosNamespace>>;

    /// Records in `namespace` whose `<blockPoolName>/<radosNamespace>`
    /// index value equals `index_key`.
    async fn list_namespaces_by_index(
        &self,
        namespace: &str,
        index_key: &str,
    ) -> StoreResult<Vec<CephBlockPoolRadosNamespace>>;

    /// Replace the finalizer list, returning the updated record.
    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: Vec<String>,
    ) -> StoreResult<CephBlockPoolRadosNamespace>;

    async fn update_status(
        &self,
        key: &ObjectKey,
        phase: NamespacePhase,
        info: std::collections::BTreeMap<String, String>,
        observed_generation: Option<i64>,
    ) -> StoreResult<()>;

    /// Upsert a condition by type.
    async fn update_condition(
        &self,
        key: &ObjectKey,
        condition: Condition,
    ) -> StoreResult<()>;

    /// `None` clears the mirroring status block.
    async fn update_mirroring_status(
        &self,
        key: &ObjectKey,
        status: Option<MirroringStatus>,
    ) -> StoreResult<()>;

    async fn get_block_pool(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPool>>;

    async fn list_clusters(
        &self,
        namespace: &str,
    ) -> StoreResult<Vec<CephCluster>>;

    async fn load_cluster_info(
        &self,
        cluster: &CephCluster,
    ) -> StoreResult<ClusterInfo>;
}

/// Merge `incoming` into `existing`, replacing a condition of the same type.
pub fn upsert_condition(existing: &mut Vec<Condition>, incoming: Condition) {
    match existing.iter().position(|c| c.type_ == incoming.type_) {
        Some(idx) => {
            let prev = &existing[idx];
            let mut next = incoming;
            if prev.status == next.status {
                next.last_transition_time = prev.last_transition_time.clone();
            }
            existing[idx] = next;
        }
        None => existing.push(incoming),
    }
}
