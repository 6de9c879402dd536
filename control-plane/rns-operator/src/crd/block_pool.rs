use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::parse_duration;

/// Subset of the CephBlockPool resource read by this operator.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephBlockPool",
    plural = "cephblockpools",
    namespaced,
    status = "CephBlockPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolSpec {
    #[serde(default)]
    pub mirroring: PoolMirroringSpec,
    #[serde(default)]
    pub status_check: MirrorHealthCheckSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolMirroringSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MirrorHealthCheckSpec {
    #[serde(default)]
    pub mirror: HealthCheckSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub disabled: bool,
    /// Poll interval, e.g. `60s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CephBlockPoolStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

pub const POOL_PHASE_READY: &str = "Ready";

impl CephBlockPool {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(|p| p == POOL_PHASE_READY)
            .unwrap_or(false)
    }

    pub fn mirroring_enabled(&self) -> bool {
        self.spec.mirroring.enabled
    }

    pub fn mirror_monitoring_disabled(&self) -> bool {
        self.spec.status_check.mirror.disabled
    }

    pub fn mirror_check_interval(&self) -> Option<Duration> {
        self.spec
            .status_check
            .mirror
            .interval
            .as_deref()
            .and_then(parse_duration)
            .filter(|d| !d.is_zero())
    }
}
