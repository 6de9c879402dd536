use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, trace};

use super::{
    BackendError, BackendResult, MirroredImage, MirroringInfo, StorageBackend,
    UNINITIALIZED_CONFIG_ERROR, split_pool_path,
};
use crate::cluster::ClusterInfo;
use crate::config::BackendConfig;
use crate::crd::rados_namespace::{
    MirroringMode, MirroringSummary, SnapshotSchedule,
};

const EEXIST: i32 = 17;
const ENOENT: i32 = 2;

/// [`StorageBackend`] that shells out to the `rbd` command line tool using
/// the config and keyring the operator writes under `config_dir`.
#[derive(Clone, Debug)]
pub struct RbdCli {
    bin: String,
    config_dir: String,
    timeout: Duration,
}

impl RbdCli {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            bin: cfg.rbd_bin.clone(),
            config_dir: cfg.config_dir.clone(),
            timeout: Duration::from_secs(cfg.command_timeout_secs),
        }
    }

    fn connection_args(&self, cluster: &ClusterInfo) -> Vec<String> {
        let ns = &cluster.namespace;
        vec![
            format!("--cluster={ns}"),
            format!("--conf={}/{ns}/{ns}.config", self.config_dir),
            "--name=client.admin".to_string(),
            format!("--keyring={}/{ns}/client.admin.keyring", self.config_dir),
        ]
    }

    #[instrument(level = "debug", skip(self, cluster), fields(ns = %cluster.namespace))]
    async fn run(
        &self,
        cluster: &ClusterInfo,
        args: &[&str],
    ) -> BackendResult<String> {
        let command = format!("{} {}", self.bin, args.join(" "));
        trace!(%command, "rbd: executing");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .args(self.connection_args(cluster))
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout(command.clone()))??;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.contains(UNINITIALIZED_CONFIG_ERROR) {
            return Err(BackendError::Uninitialized(stderr));
        }
        Err(BackendError::Command {
            command,
            code: output.status.code(),
            stderr,
        })
    }

    async fn count_json_items(
        &self,
        cluster: &ClusterInfo,
        args: &[&str],
    ) -> BackendResult<usize> {
        let out = self.run(cluster, args).await?;
        parse_json_list_len(&out)
    }
}

fn has_code(err: &BackendError, code: i32) -> bool {
    matches!(err, BackendError::Command { code: Some(c), .. } if *c == code)
}

fn parse_json_list_len(out: &str) -> BackendResult<usize> {
    if out.trim().is_empty() {
        return Ok(0);
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(out)?;
    Ok(items.len())
}

#[derive(Deserialize)]
struct PoolStatus {
    #[serde(default)]
    summary: MirroringSummary,
    #[serde(default)]
    images: Vec<MirroredImage>,
}

pub(crate) fn parse_mirroring_info(out: &str) -> BackendResult<MirroringInfo> {
    Ok(serde_json::from_str(out)?)
}

pub(crate) fn parse_pool_status(
    out: &str,
) -> BackendResult<(MirroringSummary, Vec<MirroredImage>)> {
    let status: PoolStatus = serde_json::from_str(out)?;
    Ok((status.summary, status.images))
}

#[async_trait]
impl StorageBackend for RbdCli {
    async fn create_namespace(
        &self,
        cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()> {
        let res = self
            .run(
                cluster,
                &["namespace", "create", pool, "--namespace", namespace],
            )
            .await;
        match res {
            Ok(_) => {
                info!(%pool, %namespace, "rbd: created rados namespace");
                Ok(())
            }
            Err(e) if has_code(&e, EEXIST) => {
                debug!(%pool, %namespace, "rbd: rados namespace already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_namespace(
        &self,
        cluster: &ClusterInfo,
        pool: &str,
        namespace: &str,
    ) -> BackendResult<()> {
        let list_args =
            ["ls", pool, "--namespace", namespace, "--format", "json"];
        let images = match self.count_json_items(cluster, &list_args).await {
            Ok(n) => n,
            Err(e) if has_code(&e, ENOENT) => {
                debug!(%pool, %namespace, "rbd: rados namespace already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let trash_args = [
            "trash", "ls", pool, "--namespace", namespace, "--format", "json",
        ];
        let trashed = self.count_json_items(cluster, &trash_args).await?;
        if images + trashed > 0 {
            return Err(BackendError::ContainsData(format!(
                "{pool}/{namespace}"
            )));
        }
        match self
            .run(
                cluster,
                &["namespace", "remove", pool, "--namespace", namespace],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if has_code(&e, ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn mirroring_info(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringInfo> {
        let out = self
            .run(
                cluster,
                &["mirror", "pool", "info", pool_path, "--format", "json"],
            )
            .await?;
        parse_mirroring_info(&out)
    }

    async fn enable_mirroring(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
        remote_namespace: Option<&str>,
        mode: MirroringMode,
    ) -> BackendResult<()> {
        let mut args = vec!["mirror", "pool", "enable", pool_path, mode.as_str()];
        if let Some(remote) = remote_namespace.filter(|r| !r.is_empty()) {
            args.push("--remote-namespace");
            args.push(remote);
        }
        self.run(cluster, &args).await?;
        Ok(())
    }

    async fn disable_mirroring(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<()> {
        self.run(cluster, &["mirror", "pool", "disable", pool_path])
            .await?;
        Ok(())
    }

    async fn list_mirrored_images(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<Vec<MirroredImage>> {
        let out = self
            .run(
                cluster,
                &[
                    "mirror", "pool", "status", pool_path, "--verbose",
                    "--format", "json",
                ],
            )
            .await?;
        Ok(parse_pool_status(&out)?.1)
    }

    async fn enable_snapshot_schedules(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
        schedules: &[SnapshotSchedule],
    ) -> BackendResult<()> {
        let (pool, namespace) = split_pool_path(pool_path);
        for schedule in schedules {
            let mut args = vec![
                "mirror", "snapshot", "schedule", "add", "--pool", pool,
            ];
            if !namespace.is_empty() {
                args.push("--namespace");
                args.push(namespace);
            }
            args.push(schedule.interval.as_str());
            if let Some(start) = schedule.start_time.as_deref() {
                args.push(start);
            }
            self.run(cluster, &args).await?;
        }
        Ok(())
    }

    async fn mirroring_status(
        &self,
        cluster: &ClusterInfo,
        pool_path: &str,
    ) -> BackendResult<MirroringSummary> {
        let out = self
            .run(
                cluster,
                &["mirror", "pool", "status", pool_path, "--format", "json"],
            )
            .await?;
        Ok(parse_pool_status(&out)?.0)
    }
}
