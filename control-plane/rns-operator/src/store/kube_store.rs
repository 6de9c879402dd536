use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Client;
use kube::api::{Api, ListParams, Patch, PatchParams};
use serde_json::json;
use tracing::{instrument, trace};

use super::{
    ObjectKey, ResourceStore, StoreError, StoreResult, upsert_condition,
};
use crate::cluster::{ClusterInfo, parse_mon_endpoints};
use crate::crd::Condition;
use crate::crd::block_pool::CephBlockPool;
use crate::crd::ceph_cluster::CephCluster;
use crate::crd::rados_namespace::{
    CephBlockPoolRadosNamespace, MirroringStatus, NamespacePhase,
};

pub const MON_ENDPOINTS_CONFIG_MAP: &str = "rook-ceph-mon-endpoints";
const MON_ENDPOINTS_KEY: &str = "data";

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn rns_api(&self, ns: &str) -> Api<CephBlockPoolRadosNamespace> {
        Api::namespaced(self.client.clone(), ns)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: serde_json::Value,
    ) -> StoreResult<()> {
        let patch = json!({ "status": status });
        self.rns_api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_namespace(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPoolRadosNamespace>> {
        Ok(self.rns_api(&key.namespace).get_opt(&key.name).await?)
    }

    #[instrument(level = "trace", skip(self))]
    async fn list_namespaces_by_index(
        &self,
        namespace: &str,
        index_key: &str,
    ) -> StoreResult<Vec<CephBlockPoolRadosNamespace>> {
        let list = self.rns_api(namespace).list(&ListParams::default()).await?;
        let matching: Vec<_> = list
            .items
            .into_iter()
            .filter(|r| r.index_key() == index_key)
            .collect();
        trace!(count = matching.len(), "store: indexed lookup");
        Ok(matching)
    }

    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: Vec<String>,
    ) -> StoreResult<CephBlockPoolRadosNamespace> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        Ok(self
            .rns_api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        phase: NamespacePhase,
        info: BTreeMap<String, String>,
        observed_generation: Option<i64>,
    ) -> StoreResult<()> {
        self.patch_status(
            key,
            json!({
                "phase": phase,
                "info": info,
                "observedGeneration": observed_generation,
            }),
        )
        .await
    }

    async fn update_condition(
        &self,
        key: &ObjectKey,
        condition: Condition,
    ) -> StoreResult<()> {
        let current = self
            .get_namespace(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let mut conditions = current
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default();
        upsert_condition(&mut conditions, condition);
        self.patch_status(key, json!({ "conditions": conditions }))
            .await
    }

    async fn update_mirroring_status(
        &self,
        key: &ObjectKey,
        status: Option<MirroringStatus>,
    ) -> StoreResult<()> {
        // a JSON null removes the field under merge-patch semantics
        self.patch_status(key, json!({ "mirroringStatus": status }))
            .await
    }

    async fn get_block_pool(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPool>> {
        let api: Api<CephBlockPool> =
            Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list_clusters(
        &self,
        namespace: &str,
    ) -> StoreResult<Vec<CephCluster>> {
        let api: Api<CephCluster> =
            Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn load_cluster_info(
        &self,
        cluster: &CephCluster,
    ) -> StoreResult<ClusterInfo> {
        let ns = cluster.metadata.namespace.clone().unwrap_or_default();
        let cm_api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &ns);
        let cm = cm_api.get_opt(MON_ENDPOINTS_CONFIG_MAP).await?.ok_or_else(
            || StoreError::NotFound(format!("{ns}/{MON_ENDPOINTS_CONFIG_MAP}")),
        )?;
        let monitors = cm
            .data
            .as_ref()
            .and_then(|d| d.get(MON_ENDPOINTS_KEY))
            .map(|raw| parse_mon_endpoints(raw))
            .unwrap_or_default();
        Ok(ClusterInfo::from_cluster(cluster, monitors))
    }
}
