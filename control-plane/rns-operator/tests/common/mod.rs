#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{ErrorResponse, ObjectMeta};
use tokio_util::sync::CancellationToken;

use rns_operator::backend::{
    BackendError, BackendResult, MirroredImage, MirroringInfo, PoolMirrorMode,
    StorageBackend, UNINITIALIZED_CONFIG_ERROR,
};
use rns_operator::cleanup::{CleanupError, CleanupJobs, CleanupRequest};
use rns_operator::cluster::{ClusterInfo, parse_mon_endpoints};
use rns_operator::config::OperatorConfig;
use rns_operator::controller::{
    Clock, ControllerContext, MonitorRegistry, Outcome, ReconcileErr,
    finalizer::FINALIZER, reconcile_namespace,
};
use rns_operator::crd::Condition;
use rns_operator::crd::block_pool::{
    CephBlockPool, CephBlockPoolSpec, CephBlockPoolStatus,
};
use rns_operator::crd::ceph_cluster::{
    CephCluster, CephClusterSpec, CephClusterStatus, CephHealthStatus,
    ClusterVersion,
};
use rns_operator::crd::rados_namespace::{
    CephBlockPoolRadosNamespace, CephBlockPoolRadosNamespaceSpec,
    CephBlockPoolRadosNamespaceStatus, MirroringMode, MirroringStatus,
    MirroringSummary, NamespacePhase, RadosNamespaceMirroring, SnapshotSchedule,
};
use rns_operator::csi::{
    ClientProfiles, ConfigPayload, ConfigProjection, CsiClusterConfigEntry,
    CsiResult, SharedConfigWriter, default_hasher,
};
use rns_operator::store::{
    ObjectKey, ResourceStore, StoreError, StoreResult, upsert_condition,
};

pub const CLUSTER_NAME: &str = "my-cluster";

// ---------------------------------------------------------------------------
// store

#[derive(Default)]
struct StoreState {
    namespaces: BTreeMap<ObjectKey, CephBlockPoolRadosNamespace>,
    pools: BTreeMap<ObjectKey, CephBlockPool>,
    clusters: Vec<CephCluster>,
    phases: Vec<(ObjectKey, NamespacePhase)>,
    conditions: Vec<(ObjectKey, Condition)>,
    mirroring_updates: Vec<(ObjectKey, Option<MirroringStatus>)>,
    finalizer_writes: usize,
    empty_index: bool,
}

/// In-memory stand-in for the API server. Removing the last finalizer of a
/// deleting record drops the record, like Kubernetes does.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    fn with<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn put_namespace(&self, rns: CephBlockPoolRadosNamespace) -> ObjectKey {
        let key = key_of(&rns);
        self.with(|s| s.namespaces.insert(key.clone(), rns));
        key
    }

    pub fn put_pool(&self, pool: CephBlockPool) {
        let key = ObjectKey::new(
            pool.metadata.namespace.clone().unwrap_or_default(),
            pool.metadata.name.clone().unwrap_or_default(),
        );
        self.with(|s| s.pools.insert(key, pool));
    }

    pub fn put_cluster(&self, cluster: CephCluster) {
        self.with(|s| {
            s.clusters.retain(|c| c.metadata.namespace != cluster.metadata.namespace);
            s.clusters.push(cluster)
        });
    }

    pub fn remove_clusters(&self) {
        self.with(|s| s.clusters.clear());
    }

    pub fn namespace(&self, key: &ObjectKey) -> Option<CephBlockPoolRadosNamespace> {
        self.with(|s| s.namespaces.get(key).cloned())
    }

    pub fn update_namespace(
        &self,
        key: &ObjectKey,
        f: impl FnOnce(&mut CephBlockPoolRadosNamespace),
    ) {
        self.with(|s| {
            if let Some(r) = s.namespaces.get_mut(key) {
                f(r)
            }
        });
    }

    pub fn update_pool(&self, key: &ObjectKey, f: impl FnOnce(&mut CephBlockPool)) {
        self.with(|s| {
            if let Some(p) = s.pools.get_mut(key) {
                f(p)
            }
        });
    }

    /// Mark a record for deletion, as `kubectl delete` would.
    pub fn mark_deleting(&self, key: &ObjectKey) {
        self.update_namespace(key, |r| {
            r.metadata.deletion_timestamp = Some(Time(fixed_now()));
        });
    }

    pub fn phase(&self, key: &ObjectKey) -> Option<NamespacePhase> {
        self.namespace(key)
            .and_then(|r| r.status)
            .and_then(|s| s.phase)
    }

    pub fn phases(&self) -> Vec<(ObjectKey, NamespacePhase)> {
        self.with(|s| s.phases.clone())
    }

    pub fn conditions(&self) -> Vec<(ObjectKey, Condition)> {
        self.with(|s| s.conditions.clone())
    }

    pub fn mirroring_updates(&self) -> Vec<(ObjectKey, Option<MirroringStatus>)> {
        self.with(|s| s.mirroring_updates.clone())
    }

    pub fn finalizer_writes(&self) -> usize {
        self.with(|s| s.finalizer_writes)
    }

    /// Make index lookups return nothing, as when a concurrent delete wins.
    pub fn set_empty_index(&self, empty: bool) {
        self.with(|s| s.empty_index = empty);
    }

    fn status_mut<'a>(
        s: &'a mut StoreState,
        key: &ObjectKey,
    ) -> StoreResult<&'a mut CephBlockPoolRadosNamespaceStatus> {
        let rns = s
            .namespaces
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(rns.status.get_or_insert_with(Default::default))
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_namespace(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPoolRadosNamespace>> {
        Ok(self.namespace(key))
    }

    async fn list_namespaces_by_index(
        &self,
        namespace: &str,
        index_key: &str,
    ) -> StoreResult<Vec<CephBlockPoolRadosNamespace>> {
        Ok(self.with(|s| {
            if s.empty_index {
                return Vec::new();
            }
            s.namespaces
                .iter()
                .filter(|(k, r)| k.namespace == namespace && r.index_key() == index_key)
                .map(|(_, r)| r.clone())
                .collect()
        }))
    }

    async fn set_finalizers(
        &self,
        key: &ObjectKey,
        finalizers: Vec<String>,
    ) -> StoreResult<CephBlockPoolRadosNamespace> {
        self.with(|s| {
            s.finalizer_writes += 1;
            let rns = s
                .namespaces
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            rns.metadata.finalizers = Some(finalizers);
            rns.metadata.generation = Some(rns.metadata.generation.unwrap_or(1) + 1);
            let updated = rns.clone();
            if updated.metadata.deletion_timestamp.is_some()
                && updated.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty())
            {
                s.namespaces.remove(key);
            }
            Ok(updated)
        })
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        phase: NamespacePhase,
        info: BTreeMap<String, String>,
        observed_generation: Option<i64>,
    ) -> StoreResult<()> {
        self.with(|s| {
            let status = Self::status_mut(s, key)?;
            status.phase = Some(phase);
            status.info = Some(info);
            status.observed_generation = observed_generation;
            s.phases.push((key.clone(), phase));
            Ok(())
        })
    }

    async fn update_condition(
        &self,
        key: &ObjectKey,
        condition: Condition,
    ) -> StoreResult<()> {
        self.with(|s| {
            s.conditions.push((key.clone(), condition.clone()));
            let status = Self::status_mut(s, key)?;
            upsert_condition(status.conditions.get_or_insert_with(Vec::new), condition);
            Ok(())
        })
    }

    async fn update_mirroring_status(
        &self,
        key: &ObjectKey,
        status: Option<MirroringStatus>,
    ) -> StoreResult<()> {
        self.with(|s| {
            s.mirroring_updates.push((key.clone(), status.clone()));
            Self::status_mut(s, key)?.mirroring_status = status;
            Ok(())
        })
    }

    async fn get_block_pool(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<CephBlockPool>> {
        Ok(self.with(|s| s.pools.get(key).cloned()))
    }

    async fn list_clusters(&self, namespace: &str) -> StoreResult<Vec<CephCluster>> {
        Ok(self.with(|s| {
            s.clusters
                .iter()
                .filter(|c| c.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect()
        }))
    }

    async fn load_cluster_info(&self, cluster: &CephCluster) -> StoreResult<ClusterInfo> {
        Ok(ClusterInfo::from_cluster(
            cluster,
            parse_mon_endpoints("a=10.0.0.1:6789,b=10.0.0.2:6789"),
        ))
    }
}

// ---------------------------------------------------------------------------
// backend

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Create { pool: String, namespace: String },
    Delete { pool: String, namespace: String },
    MirroringInfo(String),
    EnableMirroring {
        pool_path: String,
        remote: Option<String>,
        mode: String,
    },
    DisableMirroring(String),
    ListMirroredImages(String),
    SnapshotSchedules { pool_path: String, count: usize },
    MirroringStatus(String),
}

impl BackendCall {
    pub fn mutates_namespace(&self) -> bool {
        matches!(self, BackendCall::Create { .. } | BackendCall::Delete { .. })
    }
}

#[derive(Default)]
struct BackendState {
    calls: Vec<BackendCall>,
    existing: BTreeSet<(String, String)>,
    effective_creates: usize,
    contains_data: bool,
    mode: Option<PoolMirrorMode>,
    images: Vec<MirroredImage>,
    create_failure: Option<String>,
    delete_failure: Option<String>,
}

/// Records every call and answers from configurable state.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn namespace_calls(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(BackendCall::mutates_namespace)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn effective_creates(&self) -> usize {
        self.with(|s| s.effective_creates)
    }

    pub fn set_contains_data(&self, v: bool) {
        self.with(|s| s.contains_data = v);
    }

    pub fn set_mirror_mode(&self, mode: PoolMirrorMode) {
        self.with(|s| s.mode = Some(mode));
    }

    pub fn set_mirrored_images(&self, names: &[&str]) {
        self.with(|s| {
            s.images = names
                .iter()
                .map(|n| MirroredImage {
                    name: n.to_string(),
                    global_id: None,
                    state: Some("up+replaying".into()),
                    description: None,
                })
                .collect()
        });
    }

    pub fn fail_create_with(&self, stderr: &str) {
        self.with(|s| s.create_failure = Some(stderr.to_string()));
    }

    pub fn fail_delete_with(&self, stderr: &str) {
        self.with(|s| s.delete_failure = Some(stderr.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with(|s| {
            s.create_failure = None;
            s.delete_failure = None;
        });
    }
}

fn command_error(command: &str, stderr: &str) -> BackendError {
    BackendError::Command {
        command: command.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn create_namespace(
        &self,
        _cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(BackendCall::Create {
                pool: pool.into(),
                namespace: namespace.into(),
            });
            if let Some(stderr) = s.create_failure.clone() {
                return Err(command_error("rbd namespace create", &stderr));
            }
            if s.existing.insert((pool.into(), namespace.into())) {
                s.effective_creates += 1;
            }
            Ok(())
        })
    }

    async fn delete_namespace(
        &self,
        _cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(BackendCall::Delete {
                pool: pool.into(),
                namespace: namespace.into(),
            });
            if let Some(stderr) = s.delete_failure.clone() {
                return Err(command_error("rbd namespace remove", &stderr));
            }
            if s.contains_data {
                return Err(BackendError::ContainsData(format!("{pool}/{namespace}")));
            }
            s.existing.remove(&(pool.to_string(), namespace.to_string()));
            Ok(())
        })
    }

    async fn mirroring_info(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringInfo> {
        self.with(|s| {
            s.calls.push(BackendCall::MirroringInfo(pool_path.into()));
            Ok(MirroringInfo {
                mode: s.mode.unwrap_or(PoolMirrorMode::Disabled),
                site_name: None,
            })
        })
    }

    async fn enable_mirroring(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
        remote_namespace: Option<&str>,
        mode: MirroringMode,
    ) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(BackendCall::EnableMirroring {
                pool_path: pool_path.into(),
                remote: remote_namespace.map(str::to_string),
                mode: mode.as_str().into(),
            });
            s.mode = Some(mode.into());
            Ok(())
        })
    }

    async fn disable_mirroring(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(BackendCall::DisableMirroring(pool_path.into()));
            s.mode = Some(PoolMirrorMode::Disabled);
            Ok(())
        })
    }

    async fn list_mirrored_images(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<Vec<MirroredImage>> {
        self.with(|s| {
            s.calls.push(BackendCall::ListMirroredImages(pool_path.into()));
            Ok(s.images.clone())
        })
    }

    async fn enable_snapshot_schedules(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
        schedules: &[SnapshotSchedule],
    ) -> BackendResult<()> {
        self.with(|s| {
            s.calls.push(BackendCall::SnapshotSchedules {
                pool_path: pool_path.into(),
                count: schedules.len(),
            });
            Ok(())
        })
    }

    async fn mirroring_status(
        &self,
        _cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringSummary> {
        self.with(|s| {
            s.calls.push(BackendCall::MirroringStatus(pool_path.into()));
            Ok(MirroringSummary {
                health: Some("OK".into()),
                daemon_health: Some("OK".into()),
                image_health: Some("OK".into()),
                states: BTreeMap::new(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// csi + jobs

/// Shared CSI config payload written through the same serialized writer as
/// the real projection. Reads yield so concurrent passes interleave.
#[derive(Default)]
pub struct FakeProjection {
    pub saved: Mutex<Vec<(String, Option<CsiClusterConfigEntry>)>>,
    payload: Mutex<Option<String>>,
    writer: SharedConfigWriter,
}

impl FakeProjection {
    pub fn saved(&self) -> Vec<(String, Option<CsiClusterConfigEntry>)> {
        self.saved.lock().unwrap().clone()
    }

    /// Entries currently stored in the shared payload.
    pub fn entries(&self) -> Vec<CsiClusterConfigEntry> {
        match self.payload.lock().unwrap().as_deref() {
            Some(raw) => serde_json::from_str(raw).unwrap(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ConfigPayload for FakeProjection {
    async fn read(&self) -> CsiResult<Option<String>> {
        let current = self.payload.lock().unwrap().clone();
        tokio::task::yield_now().await;
        Ok(current)
    }

    async fn write(&self, payload: String) -> CsiResult<()> {
        *self.payload.lock().unwrap() = Some(payload);
        Ok(())
    }
}

#[async_trait]
impl ConfigProjection for FakeProjection {
    async fn save_cluster_config(
        &self,
        cluster_id: &str,
        namespace: &str,
        _cluster: &ClusterInfo,
        entry: Option<CsiClusterConfigEntry>,
    ) -> CsiResult<()> {
        self.saved
            .lock()
            .unwrap()
            .push((cluster_id.to_string(), entry.clone()));
        self.writer.save(self, cluster_id, namespace, entry).await
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    pub applied: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl ClientProfiles for FakeProfiles {
    async fn create_or_update(
        &self,
        _cluster: &ClusterInfo,
        rados_namespace: &str,
        cluster_id: &str,
        cluster_name: &str,
    ) -> CsiResult<()> {
        self.applied.lock().unwrap().push((
            rados_namespace.to_string(),
            cluster_id.to_string(),
            cluster_name.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeJobs {
    pub started: Mutex<Vec<CleanupRequest>>,
    pub fail: Mutex<bool>,
}

impl FakeJobs {
    pub fn started(&self) -> Vec<CleanupRequest> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl CleanupJobs for FakeJobs {
    async fn start_job(&self, req: &CleanupRequest) -> Result<(), CleanupError> {
        if *self.fail.lock().unwrap() {
            return Err(CleanupError::Api(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "jobs.batch is forbidden".into(),
                reason: "Forbidden".into(),
                code: 403,
            })));
        }
        self.started.lock().unwrap().push(req.clone());
        Ok(())
    }
}

pub struct FixedClock;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        fixed_now()
    }
}

// ---------------------------------------------------------------------------
// harness

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub backend: Arc<FakeBackend>,
    pub projection: Arc<FakeProjection>,
    pub profiles: Arc<FakeProfiles>,
    pub jobs: Arc<FakeJobs>,
    pub shutdown: CancellationToken,
    pub ctx: ControllerContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::default().apply_profile_defaults())
    }

    pub fn with_config(cfg: OperatorConfig) -> Self {
        let store = Arc::new(FakeStore::default());
        let backend = Arc::new(FakeBackend::default());
        let projection = Arc::new(FakeProjection::default());
        let profiles = Arc::new(FakeProfiles::default());
        let jobs = Arc::new(FakeJobs::default());
        let shutdown = CancellationToken::new();
        let ctx = ControllerContext {
            store: store.clone(),
            backend: backend.clone(),
            projection: projection.clone(),
            profiles: profiles.clone(),
            jobs: jobs.clone(),
            monitors: MonitorRegistry::new(shutdown.clone()),
            cfg,
            hasher: default_hasher(),
            clock: Arc::new(FixedClock),
            recorder: None,
        };
        Self {
            store,
            backend,
            projection,
            profiles,
            jobs,
            shutdown,
            ctx,
        }
    }

    /// Ready cluster plus a ready pool `pool` in `ns`.
    pub fn with_ready_cluster(self, ns: &str, pool: &str, pool_mirroring: bool) -> Self {
        self.store.put_cluster(ready_cluster(ns));
        self.store.put_pool(ready_pool(ns, pool, pool_mirroring));
        self
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileErr> {
        reconcile_namespace(&self.ctx, key).await
    }

    /// Reconcile until the pass no longer asks for an immediate retry.
    pub async fn settle(&self, key: &ObjectKey) -> Result<Outcome, ReconcileErr> {
        for _ in 0..5 {
            match self.reconcile(key).await? {
                Outcome::RequeueImmediate => continue,
                other => return Ok(other),
            }
        }
        panic!("{key} kept requeueing immediately");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// fixtures

pub fn key_of(rns: &CephBlockPoolRadosNamespace) -> ObjectKey {
    ObjectKey::new(
        rns.metadata.namespace.clone().unwrap_or_default(),
        rns.metadata.name.clone().unwrap_or_default(),
    )
}

pub fn rados_namespace(
    ns: &str,
    name: &str,
    pool: &str,
    spec_name: Option<&str>,
) -> CephBlockPoolRadosNamespace {
    CephBlockPoolRadosNamespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: CephBlockPoolRadosNamespaceSpec {
            name: spec_name.map(str::to_string),
            block_pool_name: pool.into(),
            mirroring: None,
        },
        status: None,
    }
}

pub fn image_mirroring(remote: &str) -> RadosNamespaceMirroring {
    RadosNamespaceMirroring {
        remote_namespace: Some(remote.into()),
        mode: MirroringMode::Image,
        snapshot_schedules: vec![SnapshotSchedule {
            interval: "24h".into(),
            start_time: None,
        }],
    }
}

pub fn with_finalizer(mut rns: CephBlockPoolRadosNamespace) -> CephBlockPoolRadosNamespace {
    rns.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    rns
}

pub fn ready_cluster(ns: &str) -> CephCluster {
    CephCluster {
        metadata: ObjectMeta {
            name: Some(CLUSTER_NAME.into()),
            namespace: Some(ns.into()),
            ..Default::default()
        },
        spec: CephClusterSpec::default(),
        status: Some(CephClusterStatus {
            phase: Some("Ready".into()),
            ceph: Some(CephHealthStatus {
                health: Some("HEALTH_OK".into()),
            }),
            version: Some(ClusterVersion {
                image: Some("quay.io/ceph/ceph:v19.2.0".into()),
                version: Some("19.2.0-0".into()),
            }),
        }),
    }
}

pub fn ready_pool(ns: &str, name: &str, mirroring: bool) -> CephBlockPool {
    let mut spec = CephBlockPoolSpec::default();
    spec.mirroring.enabled = mirroring;
    spec.mirroring.mode = mirroring.then(|| "image".to_string());
    CephBlockPool {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            ..Default::default()
        },
        spec,
        status: Some(CephBlockPoolStatus {
            phase: Some("Ready".into()),
        }),
    }
}

pub fn uninitialized_stderr() -> String {
    format!("global_init: {UNINITIALIZED_CONFIG_ERROR}")
}

/// Poll `cond` until it holds; background tasks exit asynchronously.
pub async fn eventually(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
