use anyhow::Context;
use envconfig::Envconfig;
use kube::Client;
use rns_operator::{config::OperatorConfig, init_tracing, runtime};
use tracing::{debug, info};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube's TLS stack needs a process-level provider before the first client
    if rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    )
    .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let cfg = OperatorConfig::init_from_env()
        .context("invalid operator configuration")?
        .apply_profile_defaults();
    info!(
        profile = %cfg.profile,
        operator_namespace = %cfg.operator_namespace,
        watch_namespace = cfg.watch_namespace.as_deref().unwrap_or("<all>"),
        csi_config_map = %cfg.backend.csi_config_map,
        monitoring = cfg.monitoring_enabled(),
        csi_operator = cfg.csi_operator_enabled(),
        http_port = cfg.http_port,
        "starting rados namespace operator"
    );
    debug!(?cfg, "resolved configuration");

    let client = Client::try_default()
        .await
        .context("failed to build kubernetes client")?;
    runtime::run_all(client, cfg).await
}
