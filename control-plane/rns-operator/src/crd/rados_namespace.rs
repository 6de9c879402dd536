use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Annotation opting a resource into forced cleanup of remaining images.
pub const FORCE_DELETE_ANNOTATION: &str = "ceph.rook.io/force-deletion";

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBlockPoolRadosNamespace",
    plural = "cephblockpoolradosnamespaces",
    shortname = "cephbprns",
    namespaced,
    status = "CephBlockPoolRadosNamespaceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolRadosNamespaceSpec {
    /// Rados namespace name. Defaults to `metadata.name`; an empty string
    /// targets the pool's implicit namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parent CephBlockPool in the same Kubernetes namespace
    pub block_pool_name: String,
    /// Mirroring settings for this rados namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirroring: Option<RadosNamespaceMirroring>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RadosNamespaceMirroring {
    /// Namespace on the peer cluster; same name when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_namespace: Option<String>,
    pub mode: MirroringMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshot_schedules: Vec<SnapshotSchedule>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MirroringMode {
    Image,
    Pool,
}

impl MirroringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirroringMode::Image => "image",
            MirroringMode::Pool => "pool",
        }
    }
}

impl std::fmt::Display for MirroringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSchedule {
    /// Schedule interval, e.g. `24h` or `1d`
    pub interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum NamespacePhase {
    Progressing,
    Ready,
    Failure,
}

impl std::fmt::Display for NamespacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespacePhase::Progressing => write!(f, "Progressing"),
            NamespacePhase::Ready => write!(f, "Ready"),
            NamespacePhase::Failure => write!(f, "Failure"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolRadosNamespaceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<NamespacePhase>,
    /// Derived values for consumers, at least `clusterID`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// Written by the mirroring monitor task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirroring_status: Option<MirroringStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirroringStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<MirroringSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<String>,
    /// Last polling error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MirroringSummary {
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub daemon_health: Option<String>,
    #[serde(default)]
    pub image_health: Option<String>,
    #[serde(default)]
    pub states: BTreeMap<String, u64>,
}

impl CephBlockPoolRadosNamespace {
    /// Rados namespace name as seen by the backend. Empty means the pool's
    /// implicit namespace.
    pub fn rados_namespace_name(&self) -> String {
        match self.spec.name.as_deref() {
            Some(n) => n.to_string(),
            None => self.name_any(),
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.rados_namespace_name().is_empty()
    }

    /// `pool` for the implicit namespace, `pool/namespace` otherwise.
    pub fn pool_path(&self) -> String {
        let rns = self.rados_namespace_name();
        if rns.is_empty() {
            self.spec.block_pool_name.clone()
        } else {
            format!("{}/{}", self.spec.block_pool_name, rns)
        }
    }

    /// Index value grouping records that target the same backend namespace.
    pub fn index_key(&self) -> String {
        index_key(&self.spec.block_pool_name, &self.rados_namespace_name())
    }

    pub fn force_delete_requested(&self) -> bool {
        self.annotations()
            .get(FORCE_DELETE_ANNOTATION)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

pub fn index_key(pool: &str, rados_namespace: &str) -> String {
    format!("{}/{}", pool, rados_namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn rns(name: &str, spec_name: Option<&str>) -> CephBlockPoolRadosNamespace {
        CephBlockPoolRadosNamespace {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("rook-ceph".into()),
                ..Default::default()
            },
            spec: CephBlockPoolRadosNamespaceSpec {
                name: spec_name.map(str::to_string),
                block_pool_name: "rbd".into(),
                mirroring: None,
            },
            status: None,
        }
    }

    #[test]
    fn name_defaults_to_metadata_name() {
        let r = rns("ns1", None);
        assert_eq!(r.rados_namespace_name(), "ns1");
        assert_eq!(r.pool_path(), "rbd/ns1");
        assert_eq!(r.index_key(), "rbd/ns1");
        assert!(!r.is_implicit());
    }

    #[test]
    fn empty_name_targets_pool() {
        let r = rns("default-ns", Some(""));
        assert!(r.is_implicit());
        assert_eq!(r.pool_path(), "rbd");
        assert_eq!(r.index_key(), "rbd/");
    }

    #[test]
    fn force_delete_annotation_is_case_insensitive() {
        let mut r = rns("ns1", None);
        assert!(!r.force_delete_requested());
        r.metadata.annotations = Some(
            [(FORCE_DELETE_ANNOTATION.to_string(), "TRUE".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(r.force_delete_requested());
    }

    #[test]
    fn spec_uses_camel_case() {
        let spec: CephBlockPoolRadosNamespaceSpec =
            serde_json::from_value(serde_json::json!({
                "blockPoolName": "rbd",
                "mirroring": {
                    "remoteNamespace": "ns1-r",
                    "mode": "image",
                    "snapshotSchedules": [{"interval": "24h"}]
                }
            }))
            .unwrap();
        let m = spec.mirroring.unwrap();
        assert_eq!(m.mode, MirroringMode::Image);
        assert_eq!(m.remote_namespace.as_deref(), Some("ns1-r"));
        assert_eq!(m.snapshot_schedules.len(), 1);
    }
}
