use std::net::SocketAddr;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::MonitorRegistry;

#[derive(Serialize)]
struct MonitorsResponse {
    running: Vec<String>,
}

async fn list_monitors(State(monitors): State<MonitorRegistry>) -> Json<MonitorsResponse> {
    Json(MonitorsResponse {
        running: monitors
            .running_keys()
            .into_iter()
            .map(|k| k.to_string())
            .collect(),
    })
}

pub fn build_router(monitors: MonitorRegistry) -> Router {
    // /health (preferred) and /healthz (legacy)
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/monitors", get(list_monitors))
        .with_state(monitors)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn run_http_server(
    addr: SocketAddr,
    monitors: MonitorRegistry,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(monitors);
    info!("rns-operator HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
