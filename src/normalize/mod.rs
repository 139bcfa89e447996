//! Extraction normalizer: heterogeneous raw listings in, [`NormalizedOffer`]s out.
//!
//! Pure and deterministic. No clock, no I/O: the only timestamps used are the
//! ones carried by the listing itself.

pub mod mining;
pub mod schema;

use std::collections::BTreeMap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strsim::normalized_levenshtein;

use crate::error::ExtractionFailure;
use crate::intent::catalog::{attribute_key, canonical_category, display_brand, find_brand};
use crate::intent::{Intent, CORE_FIELDS};
use crate::offer::{AttrValue, NormalizedOffer, Price, ProductIdentity, Provenance};
use crate::sources::{ListingSchema, RawListing};
use mining::{mine_attributes, parse_price_text, round2, spec_value};
use schema::{Fields, RawPrice};

/// Names at least this similar (normalized Levenshtein) at the same price are duplicates.
pub const DUPLICATE_SIMILARITY: f64 = 0.95;

const MAX_TEXT_CHARS: usize = 300;

/// Decode entities, strip tags and collapse whitespace in a source string.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// `<source>-<12 hex>` from source, name, url and price.
pub fn offer_id(source: &str, name: &str, url: Option<&str>, amount: f64) -> String {
    let mut h = Sha256::new();
    h.update(source.as_bytes());
    h.update([0x1f]);
    h.update(name.to_lowercase().as_bytes());
    h.update([0x1f]);
    h.update(url.unwrap_or("").as_bytes());
    h.update([0x1f]);
    h.update(format!("{amount:.2}").as_bytes());
    let digest = h.finalize();
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("{source}-{hex}")
}

/// Presence flag for every core field plus each attribute the intent cares about.
pub fn completeness_for(offer: &NormalizedOffer, expected: &[String]) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    for field in CORE_FIELDS {
        let present = match *field {
            "category" => offer.identity.category.is_some(),
            "brand" => offer.identity.brand.is_some(),
            "seller" => offer.seller.is_some(),
            "source_url" => offer.provenance.source_url.is_some(),
            "rating" => offer.rating.is_some(),
            "review_count" => offer.review_count.is_some(),
            "availability" => offer.availability.is_some(),
            "delivery_days" => offer.delivery_days.is_some(),
            "warranty_months" => offer.warranty_months.is_some(),
            _ => false,
        };
        out.insert(field.to_string(), present);
    }
    for attr in expected {
        if !out.contains_key(attr) {
            out.insert(attr.clone(), offer.attributes.contains_key(attr));
        }
    }
    out
}

/// Map one raw listing onto the common schema.
pub fn normalize(
    raw: &RawListing,
    expected: &[String],
) -> Result<NormalizedOffer, ExtractionFailure> {
    let obj = raw
        .payload
        .as_object()
        .ok_or(ExtractionFailure::MalformedPayload)?;
    let fields = match raw.schema {
        ListingSchema::MerchantFeed => schema::merchant_feed(obj),
        ListingSchema::JsonCatalog => schema::json_catalog(obj),
    };
    build_offer(raw, fields, expected)
}

fn build_offer(
    raw: &RawListing,
    f: Fields,
    expected: &[String],
) -> Result<NormalizedOffer, ExtractionFailure> {
    let name = f.name.ok_or(ExtractionFailure::MissingIdentity)?;
    let (amount, written_currency) = match f.price.ok_or(ExtractionFailure::MissingPrice)? {
        RawPrice::Number(n) => (round2(n), None),
        RawPrice::Text(t) => parse_price_text(&t).ok_or(ExtractionFailure::InvalidPrice)?,
    };
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ExtractionFailure::InvalidPrice);
    }
    let currency = written_currency
        .or(f.currency)
        .or_else(|| raw.currency_hint.clone())
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
        .ok_or(ExtractionFailure::InvalidPrice)?;

    let category = f
        .category_text
        .as_deref()
        .and_then(canonical_category)
        .or_else(|| canonical_category(&name))
        .map(str::to_string);
    let brand = f
        .brand
        .or_else(|| find_brand(&name).map(display_brand));

    // explicit specs first, mined text fills the gaps
    let mut attributes: BTreeMap<String, AttrValue> = BTreeMap::new();
    for (label, value) in &f.specs {
        let key = attribute_key(label);
        if !key.is_empty() {
            attributes.entry(key).or_insert_with(|| spec_value(value));
        }
    }
    let mut texts: Vec<&str> = vec![name.as_str()];
    texts.extend(f.features.iter().map(String::as_str));
    if let Some(d) = f.description.as_deref() {
        texts.push(d);
    }
    for (k, v) in mine_attributes(&texts) {
        attributes.entry(k).or_insert(v);
    }
    if !f.features.is_empty() {
        attributes.insert("features".into(), AttrValue::List(f.features.clone()));
    }

    let condition = f.condition.map(|c| {
        mining::parse_condition(&c)
            .map(str::to_string)
            .unwrap_or_else(|| c.to_lowercase())
    });

    let mut offer = NormalizedOffer {
        id: offer_id(&raw.source_id, &name, f.url.as_deref(), amount),
        identity: ProductIdentity {
            name,
            category,
            brand,
        },
        price: Price {
            amount,
            currency,
            observed_at: f.observed_at.unwrap_or(raw.fetched_at),
        },
        seller: f.seller,
        rating: f.rating,
        review_count: f.review_count,
        availability: f.availability,
        delivery_days: f.delivery_days,
        warranty_months: f.warranty_months,
        condition,
        attributes,
        provenance: Provenance {
            source_id: raw.source_id.clone(),
            source_url: f.url,
            fetched_at: raw.fetched_at,
        },
        completeness: BTreeMap::new(),
    };
    offer.completeness = completeness_for(&offer, expected);
    Ok(offer)
}

/// Offers plus what was lost on the way, per source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOutcome {
    pub offers: Vec<NormalizedOffer>,
    pub dropped: BTreeMap<String, BTreeMap<ExtractionFailure, usize>>,
    pub duplicates: BTreeMap<String, usize>,
}

impl NormalizeOutcome {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().flat_map(|m| m.values()).sum()
    }
}

/// Normalize every listing, count failures, collapse near-duplicates within
/// each source. Output order does not depend on input order.
pub fn normalize_all(listings: &[RawListing], intent: &Intent) -> NormalizeOutcome {
    crate::metrics::ensure_described();
    let expected = intent.expected_attributes();
    let mut out = NormalizeOutcome::default();
    let mut by_source: BTreeMap<String, Vec<NormalizedOffer>> = BTreeMap::new();

    for raw in listings {
        match normalize(raw, &expected) {
            Ok(o) => by_source.entry(raw.source_id.clone()).or_default().push(o),
            Err(reason) => {
                tracing::debug!(target: "normalize", source = %raw.source_id, %reason, "listing dropped");
                counter!("normalize_dropped_total", "reason" => format!("{reason:?}")).increment(1);
                *out
                    .dropped
                    .entry(raw.source_id.clone())
                    .or_default()
                    .entry(reason)
                    .or_insert(0) += 1;
            }
        }
    }

    for (source, offers) in by_source {
        let (kept, dupes) = collapse_duplicates(offers);
        if dupes > 0 {
            counter!("normalize_duplicates_total", "source" => source.clone()).increment(dupes as u64);
            out.duplicates.insert(source.clone(), dupes);
        }
        out.offers.extend(kept);
    }

    tracing::info!(
        target: "normalize",
        listings = listings.len(),
        offers = out.offers.len(),
        dropped = out.dropped_total(),
        duplicates = out.duplicates.values().sum::<usize>(),
        "normalization finished"
    );
    out
}

/// Keep the most complete offer of each near-duplicate group (smallest id on ties).
fn collapse_duplicates(mut offers: Vec<NormalizedOffer>) -> (Vec<NormalizedOffer>, usize) {
    offers.sort_by(|a, b| {
        b.completeness_ratio()
            .total_cmp(&a.completeness_ratio())
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut kept: Vec<NormalizedOffer> = Vec::with_capacity(offers.len());
    let mut dupes = 0;
    for o in offers {
        let name = o.identity.name.to_lowercase();
        let is_dupe = kept.iter().any(|k| {
            k.price.amount == o.price.amount
                && k.price.currency == o.price.currency
                && normalized_levenshtein(&k.identity.name.to_lowercase(), &name)
                    >= DUPLICATE_SIMILARITY
        });
        if is_dupe {
            dupes += 1;
        } else {
            kept.push(o);
        }
    }
    kept.sort_by(|a, b| a.id.cmp(&b.id));
    (kept, dupes)
}
