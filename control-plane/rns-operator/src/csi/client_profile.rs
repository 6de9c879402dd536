use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use serde_json::json;
use tracing::info;

use super::{ClientProfiles, CsiResult};
use crate::cluster::ClusterInfo;

const CLIENT_PROFILE_GROUP: &str = "csi.ceph.io";
const CLIENT_PROFILE_VERSION: &str = "v1alpha1";
const CLIENT_PROFILE_KIND: &str = "ClientProfile";

/// Renders the ceph-csi-operator ClientProfile for a rados namespace.
pub fn client_profile_manifest(
    namespace: &str,
    rados_namespace: &str,
    cluster_id: &str,
    cluster_name: &str,
) -> serde_json::Value {
    json!({
        "apiVersion": format!("{CLIENT_PROFILE_GROUP}/{CLIENT_PROFILE_VERSION}"),
        "kind": CLIENT_PROFILE_KIND,
        "metadata": {
            "name": cluster_id,
            "namespace": namespace,
        },
        "spec": {
            "cephConnectionRef": { "name": cluster_name },
            "rbd": { "radosNamespace": rados_namespace },
        },
    })
}

/// [`ClientProfiles`] applying ClientProfile objects with server-side apply.
#[derive(Clone)]
pub struct KubeClientProfiles {
    client: Client,
}

impl KubeClientProfiles {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientProfiles for KubeClientProfiles {
    async fn create_or_update(
        &self,
        cluster: &ClusterInfo,
        rados_namespace: &str,
        cluster_id: &str,
        cluster_name: &str,
    ) -> CsiResult<()> {
        let gvk = GroupVersionKind::gvk(
            CLIENT_PROFILE_GROUP,
            CLIENT_PROFILE_VERSION,
            CLIENT_PROFILE_KIND,
        );
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &cluster.namespace, &ar);
        let manifest = client_profile_manifest(
            &cluster.namespace,
            rados_namespace,
            cluster_id,
            cluster_name,
        );
        api.patch(
            cluster_id,
            &PatchParams::apply("rns-operator").force(),
            &Patch::Apply(&manifest),
        )
        .await?;
        info!(ns = %cluster.namespace, %cluster_id, %rados_namespace, "client profile applied");
        Ok(())
    }
}
