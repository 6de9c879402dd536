//! Storage backend capability consumed by the reconciler.
//!
//! Every call must be safe to retry: creating an existing namespace,
//! deleting a missing one or enabling mirroring twice are successes.

mod rbd;

pub use rbd::RbdCli;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterInfo;
use crate::crd::rados_namespace::{
    MirroringMode, MirroringSummary, SnapshotSchedule,
};

/// Message emitted by ceph tooling when the cluster config is not written yet.
pub const UNINITIALIZED_CONFIG_ERROR: &str = "error calling conf_read_file";

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend not initialized: {0}")]
    Uninitialized(String),

    #[error("rados namespace {0:?} contains images or snapshots")]
    ContainsData(String),

    #[error("command `{command}` failed (code {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command `{0}` timed out")]
    Timeout(String),

    #[error("failed to parse backend output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn is_uninitialized(&self) -> bool {
        match self {
            BackendError::Uninitialized(_) => true,
            BackendError::Command { stderr, .. } => {
                stderr.contains(UNINITIALIZED_CONFIG_ERROR)
            }
            BackendError::Other(msg) => msg.contains(UNINITIALIZED_CONFIG_ERROR),
            _ => false,
        }
    }

    pub fn contains_data(&self) -> bool {
        matches!(self, BackendError::ContainsData(_))
    }
}

/// Mirroring mode currently active on a pool or rados namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMirrorMode {
    Disabled,
    Image,
    Pool,
}

impl PoolMirrorMode {
    pub fn is_disabled(&self) -> bool {
        matches!(self, PoolMirrorMode::Disabled)
    }
}

impl From<MirroringMode> for PoolMirrorMode {
    fn from(m: MirroringMode) -> Self {
        match m {
            MirroringMode::Image => PoolMirrorMode::Image,
            MirroringMode::Pool => PoolMirrorMode::Pool,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroringInfo {
    pub mode: PoolMirrorMode,
    #[serde(default)]
    pub site_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredImage {
    pub name: String,
    #[serde(default)]
    pub global_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_namespace(
        &self,
        cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()>;

    /// Remove a rados namespace. Returns [`BackendError::ContainsData`] when
    /// images or snapshots are still present.
    async fn delete_namespace(
        &self,
        cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()>;

    async fn mirroring_info(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringInfo>;

    async fn enable_mirroring(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
        remote_namespace: Option<&str>,
        mode: MirroringMode,
    ) -> BackendResult<()>;

    async fn disable_mirroring(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<()>;

    async fn list_mirrored_images(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<Vec<MirroredImage>>;

    async fn enable_snapshot_schedules(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
        schedules: &[SnapshotSchedule],
    ) -> BackendResult<()>;

    /// Health summary polled by the mirroring monitor.
    async fn mirroring_status(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringSummary>;
}

/// Split `pool/namespace` into its parts; the namespace is empty for a bare pool.
pub fn split_pool_path(pool_path: &str) -> (&str, &str) {
    pool_path.split_once('/').unwrap_or((pool_path, ""))
}
