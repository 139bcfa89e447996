use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "crawl_source_attempts_total",
            "Adapter fetch attempts started, per source."
        );
        describe_counter!(
            "crawl_source_terminal_total",
            "Source tasks reaching a terminal state, by state."
        );
        describe_histogram!("crawl_run_ms", "Crawl fan-out wall time in milliseconds.");
        describe_histogram!("source_parse_ms", "Adapter payload parse time in milliseconds.");
        describe_counter!(
            "source_query_errors_total",
            "Failed search queries inside an otherwise successful catalog fetch."
        );
        describe_counter!(
            "normalize_dropped_total",
            "Raw listings rejected by the normalizer, by reason."
        );
        describe_counter!(
            "normalize_duplicates_total",
            "Near-duplicate listings collapsed within one source."
        );
        describe_counter!(
            "rank_offers_excluded_total",
            "Offers excluded by hard constraints."
        );
        describe_counter!(
            "overlay_calls_total",
            "Reasoning overlay calls, by outcome."
        );
        describe_counter!("pipeline_runs_total", "Pipeline runs, by outcome.");
        describe_histogram!("pipeline_run_ms", "End-to-end pipeline time in milliseconds.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when the pipeline last finished a run."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
