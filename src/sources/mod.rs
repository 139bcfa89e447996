// src/sources/mod.rs
pub mod pacer;
pub mod providers;
pub mod types;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::pipeline::SourceConfig;
use crate::error::SourceError;
use crate::intent::{catalog, Intent};
use providers::{json_catalog::JsonCatalogAdapter, merchant_feed::MerchantFeedAdapter};
pub use types::{FetchLimits, ListingSchema, RawListing, SourceAdapter};

/// Build one adapter per enabled source entry. A source needs either a
/// `fixture` file or an `endpoint`; fixtures win when both are set.
pub fn build_adapters(cfgs: &[SourceConfig]) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for cfg in cfgs.iter().filter(|c| c.enabled) {
        let adapter: Arc<dyn SourceAdapter> = match (&cfg.fixture, &cfg.endpoint) {
            (Some(path), _) => {
                let body = fs::read_to_string(path)
                    .with_context(|| format!("reading fixture for source {}", cfg.id))?;
                match cfg.kind {
                    ListingSchema::MerchantFeed => Arc::new(MerchantFeedAdapter::from_fixture_str(
                        &cfg.id,
                        &body,
                        cfg.currency.clone(),
                    )),
                    ListingSchema::JsonCatalog => Arc::new(JsonCatalogAdapter::from_fixture_str(
                        &cfg.id,
                        &body,
                        cfg.currency.clone(),
                    )),
                }
            }
            (None, Some(endpoint)) => {
                let client = http_client(Duration::from_millis(cfg.request_timeout_ms))?;
                match cfg.kind {
                    ListingSchema::MerchantFeed => Arc::new(MerchantFeedAdapter::from_url(
                        &cfg.id,
                        endpoint,
                        client,
                        cfg.currency.clone(),
                    )),
                    ListingSchema::JsonCatalog => Arc::new(JsonCatalogAdapter::from_url(
                        &cfg.id,
                        endpoint,
                        &cfg.query_param,
                        client,
                        cfg.currency.clone(),
                    )),
                }
            }
            (None, None) => bail!("source {} has neither fixture nor endpoint", cfg.id),
        };
        out.push(adapter);
    }
    Ok(out)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("buysmart-pipeline/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .context("building http client")
}

/// Map a transport error onto the source failure taxonomy.
pub(crate) fn classify_reqwest(err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if err.status().map(|s| s.as_u16()) == Some(429) {
        SourceError::RateLimited { retry_after: None }
    } else {
        SourceError::unavailable(err.to_string())
    }
}

/// Reject non-success responses; 429 becomes `RateLimited` with `Retry-After` (seconds).
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SourceError::RateLimited { retry_after });
    }
    Err(SourceError::unavailable(format!("http status {status}")))
}

/// Keep listings whose category text is unknown or agrees with the intent's.
pub(crate) fn matches_intent_category(intent: &Intent, text: &str) -> bool {
    match (&intent.category, catalog::canonical_category(text)) {
        (Some(want), Some(have)) => want == have,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::parse_intent;

    #[test]
    fn category_filter_keeps_unknowns() {
        let intent = parse_intent("laptop under $900").unwrap();
        assert!(matches_intent_category(&intent, "Computers > Laptops"));
        assert!(matches_intent_category(&intent, "Misc"));
        assert!(!matches_intent_category(&intent, "Audio > Headphones"));
    }

    #[test]
    fn source_without_location_is_rejected() {
        let cfg: SourceConfig = toml::from_str(
            r#"
            id = "broken"
            kind = "json_catalog"
            "#,
        )
        .unwrap();
        let err = build_adapters(&[cfg]).err().unwrap();
        assert!(err.to_string().contains("neither fixture nor endpoint"));
    }
}
