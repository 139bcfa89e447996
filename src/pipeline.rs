//! End-to-end run: intent → crawl → normalize → rank (+ overlay) → assemble.
//!
//! Only [`PipelineError`] leaves a run. Everything weaker than that is folded into
//! the data-quality report and the reasoning trace.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::{counter, gauge, histogram};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use uuid::Uuid;

use crate::assemble::{assemble, CrawlQuality};
use crate::config::PipelineConfig;
use crate::crawl::CrawlOrchestrator;
use crate::error::PipelineError;
use crate::history::RecommendationStore;
use crate::intent::{parse_intent, Intent};
use crate::normalize::normalize_all;
use crate::rank::{build_overlay, BrandTrustTable, RankingEngine, ReasoningOverlay};
use crate::recommendation::RecommendationSet;

pub struct Pipeline {
    crawl: CrawlOrchestrator,
    engine: RankingEngine,
    overlay: Arc<dyn ReasoningOverlay>,
    overlay_timeout: Duration,
    store: Option<Arc<dyn RecommendationStore>>,
}

impl Pipeline {
    pub fn new(
        crawl: CrawlOrchestrator,
        engine: RankingEngine,
        overlay: Arc<dyn ReasoningOverlay>,
        overlay_timeout: Duration,
    ) -> Self {
        Self {
            crawl,
            engine,
            overlay,
            overlay_timeout,
            store: None,
        }
    }

    /// Sources, ranking and overlay as configured.
    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let crawl = CrawlOrchestrator::from_config(cfg)?;
        let engine = RankingEngine::new(cfg.ranking.clone(), BrandTrustTable::default());
        let overlay = build_overlay(&cfg.overlay)?;
        tracing::info!(
            target: "pipeline",
            sources = ?crawl.source_ids(),
            overlay = overlay.name(),
            overlay_enabled = overlay.enabled(),
            "pipeline ready"
        );
        Ok(Self::new(
            crawl,
            engine,
            overlay,
            Duration::from_millis(cfg.overlay.timeout_ms),
        ))
    }

    pub fn with_store(mut self, store: Arc<dyn RecommendationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.crawl.source_ids()
    }

    pub fn overlay_name(&self) -> &str {
        self.overlay.name()
    }

    /// Parse `query` and run it.
    pub async fn recommend(&self, query: &str) -> Result<RecommendationSet, PipelineError> {
        let started = Instant::now();
        let result = match parse_intent(query) {
            Ok(intent) => self.run_inner(intent, started).await,
            Err(e) => Err(e),
        };
        finish_metrics(&result, started);
        result
    }

    /// Run an already parsed intent.
    pub async fn run(&self, intent: Intent) -> Result<RecommendationSet, PipelineError> {
        let started = Instant::now();
        let result = self.run_inner(intent, started).await;
        finish_metrics(&result, started);
        result
    }

    async fn run_inner(
        &self,
        intent: Intent,
        started: Instant,
    ) -> Result<RecommendationSet, PipelineError> {
        crate::metrics::ensure_described();
        let run_id = Uuid::new_v4().to_string();
        let request_deadline = started + self.crawl.settings().deadline + self.overlay_timeout;
        tracing::info!(
            target: "pipeline",
            run_id = %run_id,
            query = %query_hash(&intent.raw_text),
            category = intent.category.as_deref().unwrap_or("-"),
            constraints = intent.constraints.len(),
            preferences = intent.preferences.len(),
            "run started"
        );

        let intent = Arc::new(intent);
        let crawled = self.crawl.run(intent.clone()).await.inspect_err(|e| {
            tracing::warn!(target: "pipeline", run_id = %run_id, error = %e, "crawl produced no data");
        })?;

        let normalized = normalize_all(&crawled.listings, &intent);
        let quality = CrawlQuality {
            sources: crawled.reports,
            deadline_hit: crawled.deadline_hit,
            listings_seen: crawled.listings.len(),
            dropped: normalized.dropped,
            duplicates: normalized.duplicates,
        };

        let ranking = self
            .engine
            .rank(
                &intent,
                normalized.offers,
                self.overlay.as_ref(),
                self.overlay_timeout,
                request_deadline,
            )
            .await;

        let intent = Arc::unwrap_or_clone(intent);
        let set = assemble(
            run_id,
            intent,
            ranking,
            quality,
            self.engine.config(),
            chrono::Utc::now(),
        )?;

        let grade = set.grade();
        tracing::info!(
            target: "pipeline",
            run_id = %set.run_id,
            offers = set.recommendations.len(),
            data = ?grade.data,
            ranking = ?grade.ranking,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );

        if let Some(store) = &self.store {
            store.save(&set.intent, &set);
        }
        Ok(set)
    }
}

/// Short stable id for a query; raw text never reaches the logs.
pub fn query_hash(text: &str) -> String {
    let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

fn finish_metrics(result: &Result<RecommendationSet, PipelineError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
    histogram!("pipeline_run_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    gauge!("pipeline_last_run_ts").set(now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_hash_is_short_and_case_insensitive() {
        let a = query_hash("Laptop under $900");
        assert_eq!(a.len(), 8);
        assert_eq!(a, query_hash("  laptop UNDER $900 "));
        assert_ne!(a, query_hash("laptop under $800"));
    }
}
