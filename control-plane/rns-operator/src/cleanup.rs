//! Out-of-band cleanup job launched when deletion is forced on a rados
//! namespace that still holds images.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Client;
use kube::api::{Api, ObjectMeta, PostParams};
use tracing::{debug, info};

use crate::csi::sha256_cluster_id;

pub const BLOCK_POOL_NAME_ENV: &str = "CEPH_BLOCK_POOL_NAME";
pub const RADOS_NAMESPACE_ENV: &str = "CEPH_BLOCK_POOL_RADOS_NAMESPACE";

const JOB_NAME_PREFIX: &str = "cleanup-radosnamespace-";
const MAX_NAME_LEN: usize = 63;
const CLEANUP_APP_LABEL: &str = "rook-ceph-cleanup";

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
}

/// What a cleanup job needs to know about the namespace it drains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupRequest {
    /// Kubernetes namespace of the resource (and of the job)
    pub namespace: String,
    /// metadata.name of the CephBlockPoolRadosNamespace
    pub resource_name: String,
    pub resource_uid: Option<String>,
    pub pool: String,
    pub rados_namespace: String,
    pub cluster_name: String,
}

impl CleanupRequest {
    pub fn job_name(&self) -> String {
        cleanup_job_name(&self.pool, &self.resource_name)
    }
}

/// `cleanup-radosnamespace-<pool>-<name>`; the suffix is replaced by its
/// hash when the result would not fit a DNS-1035 label.
pub fn cleanup_job_name(pool: &str, name: &str) -> String {
    let suffix = format!("{pool}-{name}");
    if JOB_NAME_PREFIX.len() + suffix.len() > MAX_NAME_LEN {
        format!("{JOB_NAME_PREFIX}{}", sha256_cluster_id(&suffix))
    } else {
        format!("{JOB_NAME_PREFIX}{suffix}")
    }
}

#[async_trait]
pub trait CleanupJobs: Send + Sync {
    async fn start_job(&self, req: &CleanupRequest) -> Result<(), CleanupError>;
}

/// [`CleanupJobs`] creating `batch/v1` Jobs running the rook image.
#[derive(Clone)]
pub struct KubeCleanupJobs {
    client: Client,
    image: String,
}

impl KubeCleanupJobs {
    pub fn new(client: Client, image: impl Into<String>) -> Self {
        Self {
            client,
            image: image.into(),
        }
    }
}

pub fn build_cleanup_job(req: &CleanupRequest, image: &str) -> Job {
    let labels = [
        ("app".to_string(), CLEANUP_APP_LABEL.to_string()),
        ("ceph.rook.io/cluster".to_string(), req.cluster_name.clone()),
    ]
    .into_iter()
    .collect();
    let owner_references = req.resource_uid.as_ref().map(|uid| {
        vec![OwnerReference {
            api_version: "ceph.rook.io/v1".into(),
            kind: "CephBlockPoolRadosNamespace".into(),
            name: req.resource_name.clone(),
            uid: uid.clone(),
            ..Default::default()
        }]
    });
    let env = vec![
        EnvVar {
            name: BLOCK_POOL_NAME_ENV.into(),
            value: Some(req.pool.clone()),
            ..Default::default()
        },
        EnvVar {
            name: RADOS_NAMESPACE_ENV.into(),
            value: Some(req.rados_namespace.clone()),
            ..Default::default()
        },
    ];

    Job {
        metadata: ObjectMeta {
            name: Some(req.job_name()),
            namespace: Some(req.namespace.clone()),
            labels: Some(labels),
            owner_references,
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(6),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".into()),
                    containers: vec![Container {
                        name: "cleanup".into(),
                        image: Some(image.to_string()),
                        args: Some(vec![
                            "ceph".into(),
                            "clean".into(),
                            "CephBlockPoolRadosNamespace".into(),
                        ]),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[async_trait]
impl CleanupJobs for KubeCleanupJobs {
    async fn start_job(&self, req: &CleanupRequest) -> Result<(), CleanupError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &req.namespace);
        let job = build_cleanup_job(req, &self.image);
        let name = req.job_name();
        match api.create(&PostParams::default(), &job).await {
            Ok(_) => {
                info!(ns = %req.namespace, job = %name, "cleanup job started");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(ns = %req.namespace, job = %name, "cleanup job already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
