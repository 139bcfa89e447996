//! Deterministic half of the ranking engine.
//!
//! Filtering and scoring never depend on the order offers arrive in: every
//! normalization bound (min/max price, max reviews, ...) is a set property, and
//! ties fall back to source id, then name, url and offer id.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::ConstraintPolicy;
use crate::intent::catalog::find_word;
use crate::intent::{ConstraintOutcome, Criterion, Intent};
use crate::offer::NormalizedOffer;
use crate::recommendation::{Exclusion, ScoredOffer};

use super::brand_trust::BrandTrustTable;

/// Label of the implicit budget constraint.
pub const BUDGET_LABEL: &str = "budget";
/// Label of the implicit category constraint.
pub const CATEGORY_LABEL: &str = "category";

/// Per-offer result of checking every hard constraint.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConstraintCheck {
    pub violated: Vec<String>,
    pub unknown: Vec<String>,
}

/// Budget and category act as constraints too. A price quoted in another
/// currency cannot be compared and is unknown.
pub fn check_constraints(intent: &Intent, offer: &NormalizedOffer) -> ConstraintCheck {
    let mut out = ConstraintCheck::default();
    if let Some(b) = &intent.budget {
        if !offer.price.currency.eq_ignore_ascii_case(&b.currency) {
            out.unknown.push(BUDGET_LABEL.to_string());
        } else if !b.contains(offer.price.amount) {
            out.violated.push(BUDGET_LABEL.to_string());
        }
    }
    if let (Some(want), Some(have)) = (&intent.category, &offer.identity.category) {
        if want != have {
            out.violated.push(CATEGORY_LABEL.to_string());
        }
    }
    for c in &intent.constraints {
        match c.evaluate(offer) {
            ConstraintOutcome::Satisfied => {}
            ConstraintOutcome::Violated => out.violated.push(c.to_string()),
            ConstraintOutcome::Unknown => out.unknown.push(c.to_string()),
        }
    }
    out
}

/// Split offers into eligible (with their unverified constraints) and excluded.
pub fn filter_eligible(
    intent: &Intent,
    offers: Vec<NormalizedOffer>,
    policy: ConstraintPolicy,
) -> (Vec<(NormalizedOffer, Vec<String>)>, Vec<Exclusion>) {
    let mut eligible = Vec::new();
    let mut excluded = Vec::new();
    for offer in offers {
        let check = check_constraints(intent, &offer);
        let keep = check.violated.is_empty()
            && (check.unknown.is_empty() || policy == ConstraintPolicy::Lenient);
        if keep {
            eligible.push((offer, check.unknown));
        } else {
            excluded.push(Exclusion {
                offer_id: offer.id.clone(),
                name: offer.identity.name.clone(),
                source_id: offer.provenance.source_id.clone(),
                violated: check.violated,
                unknown: check.unknown,
            });
        }
    }
    excluded.sort_by(|a, b| {
        a.source_id
            .cmp(&b.source_id)
            .then_with(|| a.offer_id.cmp(&b.offer_id))
    });
    (eligible, excluded)
}

fn base_criterion(name: &str) -> Option<Criterion> {
    Some(match name {
        "price_value" => Criterion::PriceValue,
        "rating" => Criterion::Rating,
        "review_volume" => Criterion::ReviewVolume,
        "delivery_speed" => Criterion::DeliverySpeed,
        "brand_trust" => Criterion::BrandTrust,
        "warranty" => Criterion::Warranty,
        _ => return None,
    })
}

/// Configured base weights plus the intent's preference weights, renormalized to sum 1.
pub fn effective_weights(
    base: &BTreeMap<String, f64>,
    intent: &Intent,
) -> BTreeMap<Criterion, f64> {
    let mut w: BTreeMap<Criterion, f64> = base
        .iter()
        .filter_map(|(k, v)| base_criterion(k).map(|c| (c, v.max(0.0))))
        .collect();
    for p in &intent.preferences {
        *w.entry(p.criterion.clone()).or_insert(0.0) += p.weight.max(0.0);
    }
    w.retain(|_, v| *v > 0.0);
    let sum: f64 = w.values().sum();
    if sum <= 0.0 {
        return BTreeMap::from([(Criterion::PriceValue, 1.0)]);
    }
    w.values_mut().for_each(|v| *v /= sum);
    w
}

/// Set-level bounds the sub-scores are normalized against.
struct Bounds {
    /// currency → (min, max)
    price: BTreeMap<String, (f64, f64)>,
    max_reviews: u64,
    delivery: Option<(u32, u32)>,
    /// attribute → (min, max) over quantities and numbers
    attrs: BTreeMap<String, (f64, f64)>,
}

fn numeric_attr(offer: &NormalizedOffer, key: &str) -> Option<f64> {
    use crate::offer::AttrValue;
    match offer.attributes.get(key)? {
        AttrValue::Quantity(q) => Some(q.value),
        AttrValue::Number(n) => Some(*n),
        _ => None,
    }
}

fn widen(slot: &mut Option<(f64, f64)>, v: f64) {
    *slot = Some(match *slot {
        Some((lo, hi)) => (lo.min(v), hi.max(v)),
        None => (v, v),
    });
}

impl Bounds {
    fn of(offers: &[&NormalizedOffer], weights: &BTreeMap<Criterion, f64>) -> Self {
        let mut price: BTreeMap<String, Option<(f64, f64)>> = BTreeMap::new();
        let mut delivery: Option<(u32, u32)> = None;
        let mut max_reviews = 0;
        let mut attrs: BTreeMap<String, Option<(f64, f64)>> = BTreeMap::new();
        let attr_keys: Vec<&str> = weights
            .keys()
            .filter_map(|c| match c {
                Criterion::AttributeMore(a) | Criterion::AttributeLess(a) => Some(a.as_str()),
                _ => None,
            })
            .collect();

        for o in offers {
            widen(
                price.entry(o.price.currency.clone()).or_default(),
                o.price.amount,
            );
            if let Some(n) = o.review_count {
                max_reviews = max_reviews.max(n);
            }
            if let Some(d) = o.delivery_days {
                delivery = Some(match delivery {
                    Some((lo, hi)) => (lo.min(d), hi.max(d)),
                    None => (d, d),
                });
            }
            for key in &attr_keys {
                if let Some(v) = numeric_attr(o, key) {
                    widen(attrs.entry(key.to_string()).or_default(), v);
                }
            }
        }
        Self {
            price: price.into_iter().filter_map(|(k, v)| v.map(|b| (k, b))).collect(),
            max_reviews,
            delivery,
            attrs: attrs.into_iter().filter_map(|(k, v)| v.map(|b| (k, b))).collect(),
        }
    }
}

/// Min-max position of `v` within `[lo, hi]`; a single-point range scores 1.0.
fn higher_is_better(v: f64, lo: f64, hi: f64) -> f64 {
    if hi - lo <= f64::EPSILON {
        1.0
    } else {
        ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
    }
}

fn lower_is_better(v: f64, lo: f64, hi: f64) -> f64 {
    if hi - lo <= f64::EPSILON {
        1.0
    } else {
        ((hi - v) / (hi - lo)).clamp(0.0, 1.0)
    }
}

/// Sub-score in [0, 1], or `None` when the offer lacks the data.
fn sub_score(
    c: &Criterion,
    o: &NormalizedOffer,
    bounds: &Bounds,
    trust: &BrandTrustTable,
) -> Option<f64> {
    match c {
        Criterion::PriceValue => {
            let (lo, hi) = bounds.price.get(&o.price.currency)?;
            Some(lower_is_better(o.price.amount, *lo, *hi))
        }
        Criterion::Rating => o.rating.map(|r| (r / 5.0).clamp(0.0, 1.0)),
        Criterion::ReviewVolume => {
            let n = o.review_count?;
            if bounds.max_reviews == 0 {
                return Some(0.0);
            }
            Some(((n as f64).ln_1p() / (bounds.max_reviews as f64).ln_1p()).clamp(0.0, 1.0))
        }
        Criterion::DeliverySpeed => {
            let d = o.delivery_days?;
            let (lo, hi) = bounds.delivery?;
            Some(lower_is_better(d as f64, lo as f64, hi as f64))
        }
        Criterion::BrandTrust => o.identity.brand.as_deref().map(|b| trust.weight_for(b)),
        Criterion::Warranty => o.warranty_months.map(|m| (m as f64 / 36.0).min(1.0)),
        Criterion::PreferredBrand(want) => {
            let want = want.to_lowercase();
            match o.identity.brand.as_deref() {
                Some(b) => Some(if b.to_lowercase() == want { 1.0 } else { 0.0 }),
                None if find_word(&o.identity.name.to_lowercase(), &want).is_some() => Some(1.0),
                None => None,
            }
        }
        Criterion::AttributeMore(a) => {
            let v = numeric_attr(o, a)?;
            let (lo, hi) = bounds.attrs.get(a)?;
            Some(higher_is_better(v, *lo, *hi))
        }
        Criterion::AttributeLess(a) => {
            let v = numeric_attr(o, a)?;
            let (lo, hi) = bounds.attrs.get(a)?;
            Some(lower_is_better(v, *lo, *hi))
        }
        Criterion::Keyword(k) => Some(
            if find_word(&o.searchable_text(), &k.to_lowercase()).is_some() {
                1.0
            } else {
                0.0
            },
        ),
    }
}

/// Score every eligible offer and sort the result into the baseline order.
pub fn score_offers(
    eligible: Vec<(NormalizedOffer, Vec<String>)>,
    weights: &BTreeMap<Criterion, f64>,
    trust: &BrandTrustTable,
) -> Vec<ScoredOffer> {
    let refs: Vec<&NormalizedOffer> = eligible.iter().map(|(o, _)| o).collect();
    let bounds = Bounds::of(&refs, weights);

    let mut scored: Vec<ScoredOffer> = eligible
        .into_iter()
        .map(|(offer, unverified)| {
            let mut sub_scores = BTreeMap::new();
            let mut missing_criteria = Vec::new();
            let mut score = 0.0;
            for (c, w) in weights {
                let key = c.to_string();
                let s = match sub_score(c, &offer, &bounds, trust) {
                    Some(s) => s,
                    None => {
                        missing_criteria.push(key.clone());
                        0.0
                    }
                };
                score += w * s;
                sub_scores.insert(key, s);
            }
            ScoredOffer {
                offer,
                score: score.clamp(0.0, 1.0),
                sub_scores,
                unverified,
                missing_criteria,
            }
        })
        .collect();
    scored.sort_by(baseline_cmp);
    scored
}

/// Score desc, then source id, name, url and offer id.
pub fn baseline_cmp(a: &ScoredOffer, b: &ScoredOffer) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.offer.provenance.source_id.cmp(&b.offer.provenance.source_id))
        .then_with(|| a.offer.identity.name.cmp(&b.offer.identity.name))
        .then_with(|| a.offer.provenance.source_url.cmp(&b.offer.provenance.source_url))
        .then_with(|| a.offer.id.cmp(&b.offer.id))
}
