use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{ConfigProjection, CsiClusterConfigEntry, CsiResult};
use crate::cluster::ClusterInfo;

pub const CSI_CONFIG_KEY: &str = "csi-cluster-config-json";

/// Rewrite the config map payload: drop any entry for `cluster_id` and, when
/// `entry` is set, append it under that id.
pub fn update_csi_config(
    raw: Option<&str>,
    cluster_id: &str,
    namespace: &str,
    entry: Option<CsiClusterConfigEntry>,
) -> CsiResult<String> {
    let mut entries: Vec<CsiClusterConfigEntry> = match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(s)?,
        _ => Vec::new(),
    };
    entries.retain(|e| e.cluster_id != cluster_id);
    if let Some(mut e) = entry {
        e.cluster_id = cluster_id.to_string();
        if e.namespace.is_empty() {
            e.namespace = namespace.to_string();
        }
        entries.push(e);
    }
    entries.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
    Ok(serde_json::to_string(&entries)?)
}

/// Raw access to the stored `csi-cluster-config-json` payload.
#[async_trait]
pub trait ConfigPayload: Send + Sync {
    async fn read(&self) -> CsiResult<Option<String>>;
    async fn write(&self, payload: String) -> CsiResult<()>;
}

/// Serializes read-modify-write cycles on the shared payload. Every record
/// funnels through one writer, so concurrent reconciles of different
/// identities cannot drop each other's entries.
#[derive(Clone, Default)]
pub struct SharedConfigWriter {
    lock: Arc<Mutex<()>>,
}

impl SharedConfigWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save<P>(
        &self,
        payload: &P,
        cluster_id: &str,
        namespace: &str,
        entry: Option<CsiClusterConfigEntry>,
    ) -> CsiResult<()>
    where
        P: ConfigPayload + ?Sized,
    {
        let _guard = self.lock.lock().await;
        let raw = payload.read().await?;
        let updated = update_csi_config(raw.as_deref(), cluster_id, namespace, entry)?;
        payload.write(updated).await
    }
}

/// [`ConfigProjection`] writing into the operator's CSI config map.
#[derive(Clone)]
pub struct KubeConfigProjection {
    client: Client,
    operator_namespace: String,
    config_map: String,
    writer: SharedConfigWriter,
}

impl KubeConfigProjection {
    pub fn new(
        client: Client,
        operator_namespace: impl Into<String>,
        config_map: impl Into<String>,
    ) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
            config_map: config_map.into(),
            writer: SharedConfigWriter::new(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.operator_namespace)
    }
}

#[async_trait]
impl ConfigPayload for KubeConfigProjection {
    async fn read(&self) -> CsiResult<Option<String>> {
        let current = self.api().get_opt(&self.config_map).await?;
        Ok(current
            .and_then(|cm| cm.data)
            .and_then(|mut d| d.remove(CSI_CONFIG_KEY)))
    }

    async fn write(&self, payload: String) -> CsiResult<()> {
        let data: BTreeMap<String, String> =
            [(CSI_CONFIG_KEY.to_string(), payload)].into_iter().collect();
        let cm = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": self.config_map,
                "namespace": self.operator_namespace,
            },
            "data": data,
        });
        self.api()
            .patch(
                &self.config_map,
                &PatchParams::apply("rns-operator").force(),
                &Patch::Apply(&cm),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigProjection for KubeConfigProjection {
    #[instrument(level = "debug", skip(self, _cluster, entry), fields(clear = entry.is_none()))]
    async fn save_cluster_config(
        &self,
        cluster_id: &str,
        namespace: &str,
        _cluster: &ClusterInfo,
        entry: Option<CsiClusterConfigEntry>,
    ) -> CsiResult<()> {
        self.writer.save(self, cluster_id, namespace, entry).await?;
        debug!(%cluster_id, config_map = %self.config_map, "csi config saved");
        Ok(())
    }
}
