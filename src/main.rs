//! Procurement pipeline service — binary entrypoint.
//! Boots the Axum HTTP server with the configured sources, overlay and metrics.

use anyhow::Context;
use buysmart_pipeline::{build_state, create_router, metrics::Metrics, PipelineConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - PIPELINE_DEV_LOG=1
///
/// `PIPELINE_LOG_JSON=1` switches the compact layer for JSON lines.
fn enable_dev_tracing() {
    let dev_flag = std::env::var("PIPELINE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pipeline=info,crawl=info,rank=info,overlay=info,normalize=warn,warn")
    });
    let json = std::env::var("PIPELINE_LOG_JSON").is_ok_and(|v| v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    enable_dev_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let metrics = Metrics::init()?;
    let state = build_state(&cfg)?;
    let router = create_router(state, Some(&metrics));

    Ok(router.into())
}
