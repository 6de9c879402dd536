//! Registry of mirroring monitor tasks, at most one per rados namespace.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::crd::rados_namespace::CephBlockPoolRadosNamespace;

/// Logical identity of a monitor: Kubernetes namespace plus
/// `pool[/radosNamespace]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorKey {
    pub namespace: String,
    pub pool_path: String,
}

impl MonitorKey {
    pub fn new(namespace: impl Into<String>, pool_path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pool_path: pool_path.into(),
        }
    }

    pub fn for_namespace(rns: &CephBlockPoolRadosNamespace) -> Self {
        Self::new(rns.namespace().unwrap_or_default(), rns.pool_path())
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pool_path)
    }
}

struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Shared, cloneable handle to the monitor table. Every task token is a
/// child of the process-wide token so shutdown cancels all of them.
#[derive(Clone)]
pub struct MonitorRegistry {
    root: CancellationToken,
    inner: Arc<Mutex<HashMap<MonitorKey, MonitorHandle>>>,
}

impl MonitorRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<MonitorKey, MonitorHandle>> {
        // a panic while holding the lock leaves the map itself consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the monitor task for `key` unless one is already running.
    /// Returns `true` when a task was spawned.
    pub fn start<F, Fut>(&self, key: &MonitorKey, make_task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut table = self.table();
        if table.contains_key(key) {
            debug!(%key, "mirror monitor already running");
            return false;
        }
        let token = self.root.child_token();
        let task = tokio::spawn(make_task(token.clone()));
        table.insert(key.clone(), MonitorHandle { token, task });
        info!(%key, "mirror monitor started");
        true
    }

    /// Cancel and forget the task for `key`. The task is not awaited; it
    /// observes cancellation on its own.
    pub fn stop(&self, key: &MonitorKey) -> bool {
        let removed = self.table().remove(key);
        match removed {
            Some(handle) => {
                handle.token.cancel();
                info!(%key, "mirror monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &MonitorKey) -> bool {
        self.table().contains_key(key)
    }

    /// Keys of running monitors, sorted.
    pub fn running_keys(&self) -> Vec<MonitorKey> {
        let mut keys: Vec<_> = self.table().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = self.table().drain().collect();
        for (key, handle) in drained {
            handle.token.cancel();
            debug!(%key, "mirror monitor cancelled on shutdown");
        }
    }
}
