mod cluster;
mod deletion;
mod events;
pub mod finalizer;
mod mirror_checker;
mod mirroring;
mod monitor;
mod outcome;
mod reconcile;
pub mod status;

pub use mirror_checker::MirrorChecker;
pub use monitor::{MonitorKey, MonitorRegistry};
pub use outcome::Outcome;
pub use reconcile::reconcile_namespace;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher::Config};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{BackendError, StorageBackend};
use crate::cleanup::{CleanupError, CleanupJobs};
use crate::cluster::VersionError;
use crate::config::OperatorConfig;
use crate::crd::block_pool::CephBlockPool;
use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;
use crate::csi::{ClientProfiles, ClusterIdHasher, ConfigProjection, CsiError};
use crate::store::{ResourceStore, StoreError};

pub const CONTROLLER_NAME: &str = "ceph-block-pool-rados-namespace-controller";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to {op}: {source}")]
    Backend {
        op: &'static str,
        source: BackendError,
    },

    #[error("failed to update finalizer: {0}")]
    Finalizer(#[source] StoreError),

    #[error("ceph blockpool {pool:?} not found, cannot create rados namespace {name:?}")]
    ParentNotFound { pool: String, name: String },

    #[error("{0}")]
    Mirroring(String),

    #[error("failed to save cluster config: {0}")]
    ConfigProjection(#[source] CsiError),

    #[error("failed to create csi client profile: {0}")]
    ClientProfile(#[source] CsiError),

    #[error("failed to create clean up job for rados namespace {name:?}: {source}")]
    Cleanup { name: String, source: CleanupError },

    #[error("failed to resolve ceph version: {0}")]
    Version(#[from] VersionError),
}

/// Time source for status timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Everything a reconcile pass needs, injected once at startup.
#[derive(Clone)]
pub struct ControllerContext {
    pub store: Arc<dyn ResourceStore>,
    pub backend: Arc<dyn StorageBackend>,
    pub projection: Arc<dyn ConfigProjection>,
    pub profiles: Arc<dyn ClientProfiles>,
    pub jobs: Arc<dyn CleanupJobs>,
    pub monitors: MonitorRegistry,
    pub cfg: OperatorConfig,
    pub hasher: ClusterIdHasher,
    pub clock: Arc<dyn Clock>,
    pub recorder: Option<Recorder>,
}

pub async fn run_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (rns_api, pool_api): (
        Api<CephBlockPoolRadosNamespace>,
        Api<CephBlockPool>,
    ) = match ctx.cfg.watch_namespace.as_deref() {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let controller = Controller::new(rns_api, Config::default());
    let store = controller.store();
    let monitors = ctx.monitors.clone();

    info!(namespace = ?ctx.cfg.watch_namespace, "starting {CONTROLLER_NAME}");
    controller
        // a pool change requeues every rados namespace that points at it
        .watches(pool_api, Config::default(), move |pool: CephBlockPool| {
            let pool_ns = pool.namespace();
            let pool_name = pool.name_any();
            store
                .state()
                .into_iter()
                .filter(|rns| {
                    rns.namespace() == pool_ns && rns.spec.block_pool_name == pool_name
                })
                .map(|rns| ObjectRef::from_obj(rns.as_ref()))
                .collect::<Vec<_>>()
        })
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(object = %obj_ref, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    monitors.stop_all();
    info!("{CONTROLLER_NAME} stopped");
    Ok(())
}

pub fn build_recorder(client: Client) -> Recorder {
    Recorder::new(
        client,
        Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: std::env::var("POD_NAME").ok(),
        },
    )
}

async fn reconcile(
    obj: Arc<CephBlockPoolRadosNamespace>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let key = status::object_key(&obj);
    let result = reconcile_namespace(&ctx, &key).await;
    if let Some(recorder) = ctx.recorder.as_ref() {
        events::report_result(recorder, &obj, &result).await;
    }
    result.map(Action::from)
}

/// Version failures retry at once; everything else waits the configured
/// backoff.
fn error_policy(
    obj: Arc<CephBlockPoolRadosNamespace>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    error!(name = %obj.name_any(), error = %err, "reconcile failed");
    retry_outcome(err, &ctx.cfg).into()
}

pub fn retry_outcome(err: &ReconcileErr, cfg: &OperatorConfig) -> Outcome {
    match err {
        ReconcileErr::Version(_) => Outcome::RequeueImmediate,
        _ => Outcome::RequeueAfter(cfg.requeue.error_backoff()),
    }
}
