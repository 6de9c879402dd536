use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subset of the CephCluster resource read by this operator.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    plural = "cephclusters",
    namespaced,
    status = "CephClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterSpec {
    #[serde(default)]
    pub external: ExternalSpec,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub csi: CsiDriverSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpec {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<ConnectionsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSpec {
    #[serde(default)]
    pub require_msgr2: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiDriverSpec {
    #[serde(default, rename = "cephfs")]
    pub ceph_fs: CsiCephFsSpec,
    #[serde(default)]
    pub read_affinity: ReadAffinitySpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiCephFsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_mount_options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuse_mount_options: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadAffinitySpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crush_location_labels: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Present once the operator has talked to the mons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceph: Option<CephHealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ClusterVersion>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CephHealthStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub const CLUSTER_PHASE_CONNECTED: &str = "Connected";

impl CephCluster {
    pub fn is_external(&self) -> bool {
        self.spec.external.enable
    }

    pub fn require_msgr2(&self) -> bool {
        self.spec
            .network
            .connections
            .as_ref()
            .map(|c| c.require_msgr2)
            .unwrap_or(false)
    }

    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }

    pub fn has_ceph_status(&self) -> bool {
        self.status.as_ref().and_then(|s| s.ceph.as_ref()).is_some()
    }

    pub fn reported_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_ref())
            .and_then(|v| v.version.as_deref())
    }
}
