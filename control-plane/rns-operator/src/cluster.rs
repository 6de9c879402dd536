use std::collections::BTreeMap;
use std::fmt;

use crate::crd::ceph_cluster::{CephCluster, CsiDriverSpec};

const MSGR1_PORT: &str = "6789";
const MSGR2_PORT: &str = "3300";

/// Connection details for one Ceph cluster, rebuilt on every reconcile pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterInfo {
    /// Kubernetes namespace of the CephCluster
    pub namespace: String,
    /// Name of the CephCluster resource
    pub name: String,
    /// mon name -> `ip:port`
    pub monitors: BTreeMap<String, String>,
    pub ceph_version: Option<CephVersion>,
    pub csi_driver: CsiDriverSpec,
    pub require_msgr2: bool,
}

impl ClusterInfo {
    pub fn from_cluster(
        cluster: &CephCluster,
        monitors: BTreeMap<String, String>,
    ) -> Self {
        Self {
            namespace: cluster.metadata.namespace.clone().unwrap_or_default(),
            name: cluster.metadata.name.clone().unwrap_or_default(),
            monitors,
            ceph_version: None,
            csi_driver: cluster.spec.csi.clone(),
            require_msgr2: cluster.require_msgr2(),
        }
    }

    /// Monitor endpoints as handed to CSI, sorted by mon name. When msgr2
    /// is required the legacy v1 port is rewritten to the v2 port.
    pub fn mon_endpoints(&self) -> Vec<String> {
        self.monitors
            .values()
            .map(|ep| {
                if !self.require_msgr2 {
                    return ep.clone();
                }
                match ep.rsplit_once(':') {
                    Some((host, MSGR1_PORT)) => format!("{host}:{MSGR2_PORT}"),
                    _ => ep.clone(),
                }
            })
            .collect()
    }
}

/// Parse the `data` value of the mon endpoints config map, e.g.
/// `a=10.0.0.1:6789,b=10.0.0.2:6789`.
pub fn parse_mon_endpoints(data: &str) -> BTreeMap<String, String> {
    data.split(',')
        .filter_map(|entry| {
            let (name, ep) = entry.trim().split_once('=')?;
            if name.is_empty() || ep.is_empty() {
                return None;
            }
            Some((name.to_string(), ep.to_string()))
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CephVersion {
    pub major: u32,
    pub minor: u32,
    pub extra: u32,
}

impl fmt::Display for CephVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.extra)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("cluster {0:?} has not reported a ceph version yet")]
    Missing(String),
    #[error("invalid ceph version {0:?}")]
    Invalid(String),
}

impl CephVersion {
    /// Parse `19.2.0`, `19.2.0-0` or `v18.2.4-20240724`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::Invalid(s.to_string());
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed.split('-').next().ok_or_else(invalid)?;
        let mut parts = core.split('.');
        let mut next = || -> Result<u32, VersionError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };
        Ok(Self {
            major: next()?,
            minor: next()?,
            extra: next()?,
        })
    }

    pub fn from_cluster(cluster: &CephCluster) -> Result<Self, VersionError> {
        let raw = cluster.reported_version().ok_or_else(|| {
            VersionError::Missing(cluster.metadata.name.clone().unwrap_or_default())
        })?;
        Self::parse(raw)
    }
}
