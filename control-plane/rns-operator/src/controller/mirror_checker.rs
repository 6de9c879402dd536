use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::Clock;
use crate::backend::StorageBackend;
use crate::cluster::ClusterInfo;
use crate::crd::rados_namespace::{MirroringStatus, MirroringSummary};
use crate::store::{ObjectKey, ResourceStore};

/// Periodic poller writing `status.mirroringStatus` for one rados namespace.
pub struct MirrorChecker {
    pub store: Arc<dyn ResourceStore>,
    pub backend: Arc<dyn StorageBackend>,
    pub clock: Arc<dyn Clock>,
    pub cluster: ClusterInfo,
    pub key: ObjectKey,
    pub pool_path: String,
    pub interval: Duration,
}

impl MirrorChecker {
    #[instrument(skip_all, fields(ns = %self.key.namespace, name = %self.key.name, pool = %self.pool_path))]
    pub async fn run(self, token: CancellationToken) {
        let mut previous: Option<MirroringSummary> = None;
        let mut last_changed: Option<String> = None;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.check_once(&mut previous, &mut last_changed) => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("mirror checker exited");
    }

    async fn check_once(
        &self,
        previous: &mut Option<MirroringSummary>,
        last_changed: &mut Option<String>,
    ) {
        let now = self.clock.now().to_rfc3339();
        let status = match self
            .backend
            .mirroring_status(&self.cluster, &self.pool_path)
            .await
        {
            Ok(summary) => {
                if previous.as_ref() != Some(&summary) {
                    *last_changed = Some(now.clone());
                    *previous = Some(summary.clone());
                }
                MirroringStatus {
                    summary: Some(summary),
                    last_checked: Some(now),
                    last_changed: last_changed.clone(),
                    details: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to poll mirroring status");
                MirroringStatus {
                    summary: previous.clone(),
                    last_checked: Some(now),
                    last_changed: last_changed.clone(),
                    details: Some(e.to_string()),
                }
            }
        };
        if let Err(e) = self
            .store
            .update_mirroring_status(&self.key, Some(status))
            .await
        {
            warn!(error = %e, "failed to persist mirroring status");
        }
    }
}
