pub mod backend;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod csi;
pub mod runtime;
pub mod store;
pub mod web;

use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init_tracing(default_env: &str) {
    let fallback = || EnvFilter::new("info");
    let filter = match default_env.parse() {
        Ok(directive) => EnvFilter::builder()
            .with_env_var("RUST_LOG")
            .from_env_lossy()
            .add_directive(directive),
        Err(_) => fallback(),
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
