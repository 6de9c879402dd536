//! Projections consumed by the CSI driver: the shared cluster config map
//! entry and the optional ceph-csi-operator ClientProfile.

mod client_profile;
mod config_map;

pub use client_profile::KubeClientProfiles;
pub use config_map::{
    CSI_CONFIG_KEY, ConfigPayload, KubeConfigProjection, SharedConfigWriter,
    update_csi_config,
};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cluster::ClusterInfo;
use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;

pub type CsiResult<T> = Result<T, CsiError>;

#[derive(Debug, thiserror::Error)]
pub enum CsiError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    #[error("invalid csi config: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maps the clusterID source string to the published identifier.
pub type ClusterIdHasher = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// First 16 bytes of the SHA-256 digest, hex encoded.
pub fn sha256_cluster_id(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

pub fn default_hasher() -> ClusterIdHasher {
    Arc::new(sha256_cluster_id)
}

/// `<namespace>-<pool>-block-<radosNamespace>`
pub fn cluster_id_source(rns: &CephBlockPoolRadosNamespace) -> String {
    format!(
        "{}-{}-block-{}",
        rns.metadata.namespace.as_deref().unwrap_or_default(),
        rns.spec.block_pool_name,
        rns.rados_namespace_name()
    )
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiClusterConfigEntry {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub monitors: Vec<String>,
    #[serde(default)]
    pub rbd: CsiRbdSpec,
    #[serde(default, rename = "cephFS")]
    pub ceph_fs: CsiCephFsOptions,
    #[serde(default)]
    pub read_affinity: CsiReadAffinity,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiRbdSpec {
    #[serde(default)]
    pub rados_namespace: String,
    #[serde(default)]
    pub net_namespace_file_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiCephFsOptions {
    #[serde(default)]
    pub kernel_mount_options: String,
    #[serde(default)]
    pub fuse_mount_options: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiReadAffinity {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub crush_location_labels: Vec<String>,
}

impl CsiClusterConfigEntry {
    /// Entry for a rados namespace on `cluster`. The CSI driver discovers
    /// mon changes through the mon health checker, so only the current
    /// endpoints are recorded here.
    pub fn for_rados_namespace(cluster: &ClusterInfo, rados_namespace: &str) -> Self {
        let csi = &cluster.csi_driver;
        Self {
            cluster_id: String::new(),
            namespace: cluster.namespace.clone(),
            monitors: cluster.mon_endpoints(),
            rbd: CsiRbdSpec {
                rados_namespace: rados_namespace.to_string(),
                net_namespace_file_path: String::new(),
            },
            ceph_fs: CsiCephFsOptions {
                kernel_mount_options: csi
                    .ceph_fs
                    .kernel_mount_options
                    .clone()
                    .unwrap_or_default(),
                fuse_mount_options: csi
                    .ceph_fs
                    .fuse_mount_options
                    .clone()
                    .unwrap_or_default(),
            },
            read_affinity: CsiReadAffinity {
                enabled: csi.read_affinity.enabled,
                crush_location_labels: csi.read_affinity.crush_location_labels.clone(),
            },
        }
    }
}

#[async_trait]
pub trait ConfigProjection: Send + Sync {
    /// Write (or with `None`, remove) the entry for `cluster_id`.
    async fn save_cluster_config(
        &self,
        cluster_id: &str,
        namespace: &str,
        cluster: &ClusterInfo,
        entry: Option<CsiClusterConfigEntry>,
    ) -> CsiResult<()>;
}

#[async_trait]
pub trait ClientProfiles: Send + Sync {
    async fn create_or_update(
        &self,
        cluster: &ClusterInfo,
        rados_namespace: &str,
        cluster_id: &str,
        cluster_name: &str,
    ) -> CsiResult<()>;
}
