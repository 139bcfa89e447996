#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use buysmart_pipeline::config::RankingConfig;
use buysmart_pipeline::crawl::{CrawlOrchestrator, CrawlSettings, RetryPolicy, SourceHandle};
use buysmart_pipeline::error::SourceError;
use buysmart_pipeline::intent::Intent;
use buysmart_pipeline::offer::{AttrValue, NormalizedOffer, Price, ProductIdentity, Provenance};
use buysmart_pipeline::pipeline::Pipeline;
use buysmart_pipeline::rank::{BrandTrustTable, RankingEngine, ReasoningOverlay};
use buysmart_pipeline::sources::pacer::Pacer;
use buysmart_pipeline::sources::providers::json_catalog::JsonCatalogAdapter;
use buysmart_pipeline::sources::providers::merchant_feed::MerchantFeedAdapter;
use buysmart_pipeline::sources::{FetchLimits, ListingSchema, RawListing, SourceAdapter};
use buysmart_pipeline::units::{Quantity, Unit};

pub const LAPTOP_QUERY: &str = "laptop under $900 with at least 16GB RAM";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("fixture readable")
}

pub fn shop_a() -> Arc<dyn SourceAdapter> {
    Arc::new(MerchantFeedAdapter::from_fixture_str(
        "shop-a",
        &fixture("shop_a_feed.xml"),
        Some("USD".into()),
    ))
}

pub fn shop_b() -> Arc<dyn SourceAdapter> {
    Arc::new(JsonCatalogAdapter::from_fixture_str(
        "shop-b",
        &fixture("shop_b_catalog.json"),
        Some("USD".into()),
    ))
}

/// Never answers; only the crawl deadline ends it.
pub struct HangingSource(pub &'static str);

#[async_trait]
impl SourceAdapter for HangingSource {
    fn id(&self) -> &str {
        self.0
    }
    fn schema(&self) -> ListingSchema {
        ListingSchema::JsonCatalog
    }
    async fn fetch(
        &self,
        _intent: &Intent,
        _limits: &FetchLimits,
        _deadline: Instant,
    ) -> Result<Vec<RawListing>, SourceError> {
        std::future::pending().await
    }
}

pub fn orchestrator(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    deadline: Duration,
) -> CrawlOrchestrator {
    let sources = adapters
        .into_iter()
        .map(|a| {
            SourceHandle::new(
                a,
                FetchLimits {
                    max_listings: 50,
                    max_queries: 3,
                    pacer: Arc::new(Pacer::new(1, Duration::ZERO)),
                },
            )
        })
        .collect();
    CrawlOrchestrator::new(
        sources,
        CrawlSettings {
            deadline,
            attempt_timeout: deadline,
            global_concurrency: 4,
            retry: RetryPolicy {
                max_attempts: 2,
                base: Duration::from_millis(50),
                max: Duration::from_millis(200),
            },
        },
    )
}

pub fn pipeline(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    deadline: Duration,
    overlay: Arc<dyn ReasoningOverlay>,
) -> Pipeline {
    Pipeline::new(
        orchestrator(adapters, deadline),
        RankingEngine::new(RankingConfig::default(), BrandTrustTable::default()),
        overlay,
        Duration::from_millis(500),
    )
}

pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// A laptop offer with the fields scoring looks at.
pub fn laptop(
    source: &str,
    name: &str,
    price: f64,
    ram_gb: Option<f64>,
    rating: Option<f64>,
) -> NormalizedOffer {
    let mut attributes = BTreeMap::new();
    if let Some(gb) = ram_gb {
        attributes.insert(
            "ram".to_string(),
            AttrValue::Quantity(Quantity::new(gb, Unit::Gigabyte)),
        );
    }
    NormalizedOffer {
        id: format!("{source}-{}", name.to_lowercase().replace(' ', "-")),
        identity: ProductIdentity {
            name: name.to_string(),
            category: Some("laptop".into()),
            brand: name.split_whitespace().next().map(str::to_string),
        },
        price: Price {
            amount: price,
            currency: "USD".into(),
            observed_at: ts(),
        },
        seller: None,
        rating,
        review_count: rating.map(|r| (r * 100.0) as u64),
        availability: None,
        delivery_days: None,
        warranty_months: None,
        condition: None,
        attributes,
        provenance: Provenance {
            source_id: source.to_string(),
            source_url: Some(format!("https://{source}.example/{}", name.len())),
            fetched_at: ts(),
        },
        completeness: BTreeMap::new(),
    }
}

/// Twenty offers across three sources, with ties and gaps.
pub fn offer_pool() -> Vec<NormalizedOffer> {
    let mut out = Vec::new();
    for i in 0..20 {
        let source = ["shop-a", "shop-b", "shop-c"][i % 3];
        let price = 500.0 + ((i * 37) % 400) as f64;
        let ram = match i % 4 {
            0 => Some(8.0),
            1 | 2 => Some(16.0),
            _ => None,
        };
        let rating = if i % 5 == 0 { None } else { Some(3.5 + (i % 3) as f64 * 0.5) };
        // consecutive offers share a name but come from different sources
        let name = format!("Acme Book {}", i / 2);
        out.push(laptop(source, &name, price, ram, rating));
    }
    out
}
