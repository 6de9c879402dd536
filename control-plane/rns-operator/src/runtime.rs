use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    backend::RbdCli,
    cleanup::KubeCleanupJobs,
    config::OperatorConfig,
    controller::{
        ControllerContext, MonitorRegistry, SystemClock, build_recorder,
        run_controller,
    },
    csi::{KubeClientProfiles, KubeConfigProjection, default_hasher},
    store::KubeStore,
    web::run_http_server,
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &OperatorConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Wire the Kubernetes-backed collaborators into a controller context.
pub fn build_context(
    client: Client,
    cfg: OperatorConfig,
    shutdown: CancellationToken,
) -> ControllerContext {
    ControllerContext {
        store: Arc::new(KubeStore::new(client.clone())),
        backend: Arc::new(RbdCli::new(&cfg.backend)),
        projection: Arc::new(KubeConfigProjection::new(
            client.clone(),
            cfg.operator_namespace.clone(),
            cfg.backend.csi_config_map.clone(),
        )),
        profiles: Arc::new(KubeClientProfiles::new(client.clone())),
        jobs: Arc::new(KubeCleanupJobs::new(client.clone(), cfg.image.clone())),
        monitors: MonitorRegistry::new(shutdown),
        cfg,
        hasher: default_hasher(),
        clock: Arc::new(SystemClock),
        recorder: Some(build_recorder(client)),
    }
}

/// Spawn the Kubernetes controller loop.
pub fn spawn_controller(
    client: Client,
    ctx: Arc<ControllerContext>,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, ctx, shutdown).await })
}

/// Spawn the HTTP server for health checks and monitor listing.
pub fn spawn_http(
    addr: SocketAddr,
    monitors: MonitorRegistry,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr, monitors, shutdown).await })
}

/// Start controller and HTTP services and wait until both finish. Ctrl-C
/// cancels the shared token, which stops both and every monitor task.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let shutdown = CancellationToken::new();

    let ctx = Arc::new(build_context(client.clone(), cfg, shutdown.clone()));
    let monitors = ctx.monitors.clone();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let controller = spawn_controller(client, ctx, shutdown.clone());
    let http = spawn_http(http_addr, monitors, shutdown);

    let (c_res, h_res) = try_join!(controller, http)?;
    c_res?;
    h_res?;
    Ok(())
}
