use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tokio::time::Instant;

use crate::error::SourceError;
use crate::intent::Intent;
use crate::sources::types::{FetchLimits, ListingSchema, RawListing, SourceAdapter};
use crate::sources::{check_status, classify_reqwest, matches_intent_category};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "lastBuildDate")]
    last_build_date: Option<String>,
    #[serde(default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    price: Option<String>,
    brand: Option<String>,
    product_type: Option<String>,
    availability: Option<String>,
    condition: Option<String>,
    rating: Option<String>,
    review_count: Option<String>,
    shipping_days: Option<String>,
    warranty: Option<String>,
    seller: Option<String>,
    specs: Option<Specs>,
    features: Option<Features>,
}

#[derive(Debug, Deserialize)]
struct Specs {
    #[serde(default)]
    spec: Vec<Spec>,
}

#[derive(Debug, Deserialize)]
struct Spec {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Features {
    #[serde(default)]
    feature: Vec<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0)
}

/// RSS-style product feed (one `<item>` per product).
pub struct MerchantFeedAdapter {
    id: String,
    mode: Mode,
    currency: Option<String>,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl MerchantFeedAdapter {
    pub fn from_fixture_str(id: &str, xml: &str, currency: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Fixture(xml.to_string()),
            currency,
        }
    }

    pub fn from_url(id: &str, url: &str, client: reqwest::Client, currency: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
            currency,
        }
    }

    fn parse_listings(
        &self,
        xml: &str,
        intent: &Intent,
        max_listings: usize,
    ) -> Result<Vec<RawListing>, SourceError> {
        let t0 = std::time::Instant::now();
        let clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&clean)
            .map_err(|e| SourceError::unavailable(format!("malformed feed: {e}")))?;

        let fetched_at = Utc::now();
        let channel_ts = rss.channel.last_build_date.as_deref().and_then(parse_rfc2822);

        let mut out = Vec::new();
        for it in rss.channel.item {
            let category_text = format!(
                "{} {}",
                it.product_type.as_deref().unwrap_or_default(),
                it.title.as_deref().unwrap_or_default()
            );
            if !matches_intent_category(intent, &category_text) {
                continue;
            }
            let observed_at = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .or(channel_ts)
                .map(|t| t.to_rfc3339());
            out.push(RawListing {
                source_id: self.id.clone(),
                schema: ListingSchema::MerchantFeed,
                payload: item_payload(it, observed_at),
                fetched_at,
                currency_hint: self.currency.clone(),
            });
            if out.len() >= max_listings {
                break;
            }
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_parse_ms", "source" => self.id.clone()).record(ms);
        Ok(out)
    }
}

fn item_payload(it: Item, observed_at: Option<String>) -> Value {
    let specs: Map<String, Value> = it
        .specs
        .map(|s| {
            s.spec
                .into_iter()
                .map(|sp| (sp.name, Value::String(sp.value)))
                .collect()
        })
        .unwrap_or_default();
    let features: Vec<String> = it.features.map(|f| f.feature).unwrap_or_default();
    json!({
        "title": it.title,
        "link": it.link,
        "description": it.description,
        "price": it.price,
        "brand": it.brand,
        "product_type": it.product_type,
        "availability": it.availability,
        "condition": it.condition,
        "rating": it.rating,
        "review_count": it.review_count,
        "shipping_days": it.shipping_days,
        "warranty": it.warranty,
        "seller": it.seller,
        "specs": specs,
        "features": features,
        "observed_at": observed_at,
    })
}

#[async_trait]
impl SourceAdapter for MerchantFeedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self) -> ListingSchema {
        ListingSchema::MerchantFeed
    }

    async fn fetch(
        &self,
        intent: &Intent,
        limits: &FetchLimits,
        deadline: Instant,
    ) -> Result<Vec<RawListing>, SourceError> {
        let _slot = limits.pacer.acquire(deadline).await?;
        match &self.mode {
            Mode::Fixture(s) => self.parse_listings(s, intent, limits.max_listings),
            Mode::Http { url, client } => {
                let resp = client.get(url.as_str()).send().await.map_err(|e| {
                    tracing::warn!(target: "crawl", error = %e, source = %self.id, "feed http error");
                    classify_reqwest(&e)
                })?;
                let body = check_status(resp)?
                    .text()
                    .await
                    .map_err(|e| classify_reqwest(&e))?;
                self.parse_listings(&body, intent, limits.max_listings)
            }
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&trade;", "")
        .replace("&reg;", "")
}
