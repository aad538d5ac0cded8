//! `podium-api` binary entrypoint.
//!
//! Loads configuration from environment variables, starts the worker
//! pool, and serves the HTTP control plane.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use podium_api::config::ApiConfig;
use podium_api::server::Server;
use podium_core::observability::{init_logging, LogFormat};
use podium_engine::config::EngineConfig;

fn choose_log_format(config: &ApiConfig) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let api_config = ApiConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    init_logging(choose_log_format(&api_config));

    if api_config.admin_token.is_none() {
        tracing::warn!("PODIUM_ADMIN_TOKEN not set; admin routes are open (dev posture)");
    }

    if let Err(err) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %err, "prometheus exporter not installed; metrics are no-ops");
    }

    let server = Server::builder()
        .api_config(api_config)
        .engine_config(engine_config)
        .build();

    let pool = server.spawn_workers();
    tracing::info!(workers = pool.worker_count(), "worker pool started");

    server.serve().await?;
    pool.shutdown().await;
    Ok(())
}
