// src/config/pipeline.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::overlay::OverlayConfig;
use crate::sources::ListingSchema;

pub const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/pipeline.toml";

fn default_deadline_ms() -> u64 {
    8_000
}
fn default_attempt_timeout_ms() -> u64 {
    5_000
}
fn default_global_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    4_000
}
fn default_true() -> bool {
    true
}
fn default_query_param() -> String {
    "q".to_string()
}
fn default_source_concurrency() -> usize {
    2
}
fn default_min_interval_ms() -> u64 {
    250
}
fn default_max_listings() -> usize {
    50
}
fn default_max_queries() -> usize {
    3
}
fn default_request_timeout_ms() -> u64 {
    4_000
}
fn default_max_rank_shift() -> usize {
    2
}
fn default_stale_after_hours() -> u64 {
    24
}
/// A year; prices older than that are stale whatever the config says.
pub const MAX_STALE_AFTER_HOURS: u64 = 24 * 365;
fn default_low_completeness() -> f64 {
    0.5
}
fn default_history_capacity() -> usize {
    100
}

/// Whole-pipeline configuration (`config/pipeline.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            sources: Vec::new(),
            ranking: RankingConfig::default(),
            overlay: OverlayConfig::default(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Wall-clock budget for the whole fan-out.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Upper bound for a single adapter call (never past the deadline).
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            global_concurrency: default_global_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl CrawlConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: ListingSchema,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Feed URL, or search endpoint for JSON catalogs.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Local file served instead of the network (tests, demo).
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    /// Currency the source quotes prices in when a price string has none.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_source_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_listings")]
    pub max_listings: usize,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Missing constrained attribute: exclude (`strict`) or keep flagged (`lenient`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintPolicy {
    #[default]
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub constraint_policy: ConstraintPolicy,
    /// Base weights per criterion name (`price_value`, `rating`, ...).
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
    #[serde(default = "default_max_rank_shift")]
    pub max_rank_shift: usize,
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u64,
    /// Offers below this completeness ratio are listed in the data-quality report.
    #[serde(default = "default_low_completeness")]
    pub low_completeness: f64,
    /// Cap on returned recommendations (0 = all).
    #[serde(default)]
    pub max_results: usize,
}

pub fn default_weights() -> BTreeMap<String, f64> {
    [
        ("price_value", 0.25),
        ("rating", 0.20),
        ("review_volume", 0.10),
        ("brand_trust", 0.15),
        ("delivery_speed", 0.15),
        ("warranty", 0.15),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            constraint_policy: ConstraintPolicy::default(),
            weights: default_weights(),
            max_rank_shift: default_max_rank_shift(),
            stale_after_hours: default_stale_after_hours(),
            low_completeness: default_low_completeness(),
            max_results: 0,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let mut cfg: PipelineConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;

        // Relative fixture paths are resolved against the config file's directory parent
        // (the repo root for `config/pipeline.toml`).
        let base = path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        for s in &mut cfg.sources {
            let resolved = match &s.fixture {
                Some(f) if f.is_relative() && !f.exists() => Some(base.join(f)),
                _ => None,
            };
            if resolved.is_some() {
                s.fixture = resolved;
            }
        }

        cfg.overlay.resolve_api_key()?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults (no sources)
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let p = PathBuf::from(DEFAULT_PATH);
        if p.exists() {
            return Self::load_from_file(&p);
        }
        Ok(Self::default())
    }

    /// Clamp out-of-range values instead of failing the load.
    pub fn sanitize(&mut self) {
        let c = &mut self.crawl;
        if c.deadline_ms == 0 {
            c.deadline_ms = default_deadline_ms();
        }
        c.attempt_timeout_ms = c.attempt_timeout_ms.clamp(1, c.deadline_ms);
        c.global_concurrency = c.global_concurrency.max(1);
        c.max_attempts = c.max_attempts.clamp(1, 10);
        if c.base_backoff_ms > c.max_backoff_ms {
            std::mem::swap(&mut c.base_backoff_ms, &mut c.max_backoff_ms);
        }

        for s in &mut self.sources {
            s.concurrency = s.concurrency.max(1);
            s.max_listings = s.max_listings.max(1);
            s.max_queries = s.max_queries.clamp(1, 5);
            if let Some(cur) = &mut s.currency {
                *cur = cur.trim().to_ascii_uppercase();
            }
        }

        let r = &mut self.ranking;
        r.weights.retain(|_, w| w.is_finite() && *w >= 0.0);
        if r.weights.values().sum::<f64>() <= 0.0 {
            r.weights = default_weights();
        }
        if !(0.0..=1.0).contains(&r.low_completeness) {
            r.low_completeness = default_low_completeness();
        }
        if r.stale_after_hours == 0 {
            r.stale_after_hours = default_stale_after_hours();
        }
        r.stale_after_hours = r.stale_after_hours.min(MAX_STALE_AFTER_HOURS);

        self.overlay.sanitize();
        if self.history_capacity == 0 {
            self.history_capacity = default_history_capacity();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
history_capacity = 10

[crawl]
deadline_ms = 2000
max_attempts = 0
base_backoff_ms = 900
max_backoff_ms = 100

[[sources]]
id = "shop-a"
kind = "merchant_feed"
fixture = "tests/fixtures/shop_a_feed.xml"
currency = " usd "

[[sources]]
id = "shop-b"
kind = "json_catalog"
endpoint = "https://catalog.example/search"
max_queries = 9

[ranking]
constraint_policy = "lenient"
weights = { price_value = 1.0, rating = -2.0 }
stale_after_hours = 9223372036854775807

[overlay]
enabled = false
"#;

    #[test]
    fn parses_and_sanitizes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = PipelineConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.crawl.deadline_ms, 2000);
        assert_eq!(cfg.crawl.max_attempts, 1);
        assert_eq!((cfg.crawl.base_backoff_ms, cfg.crawl.max_backoff_ms), (100, 900));
        assert_eq!(cfg.crawl.global_concurrency, 4);

        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].kind, ListingSchema::MerchantFeed);
        assert_eq!(cfg.sources[0].currency.as_deref(), Some("USD"));
        assert_eq!(cfg.sources[1].max_queries, 5);
        assert_eq!(cfg.sources[1].query_param, "q");

        assert_eq!(cfg.ranking.constraint_policy, ConstraintPolicy::Lenient);
        assert_eq!(cfg.ranking.weights.len(), 1);
        assert_eq!(cfg.ranking.max_rank_shift, 2);
        assert_eq!(cfg.ranking.stale_after_hours, MAX_STALE_AFTER_HOURS);
        assert_eq!(cfg.history_capacity, 10);
    }

    #[test]
    fn rejects_unknown_source_kind() {
        let err = toml::from_str::<PipelineConfig>(
            r#"
            [[sources]]
            id = "x"
            kind = "carrier_pigeon"
            "#,
        );
        assert!(err.is_err());
    }
}
