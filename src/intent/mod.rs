//! Intent model: the structured purchasing goal every downstream stage consumes.
//!
//! An [`Intent`] is built once per request by [`parser::parse_intent`] and never
//! mutated afterwards. Hard constraints are evaluated one offer at a time, with no
//! reference to any other offer.

pub mod catalog;
pub mod parser;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::offer::{AttrValue, NormalizedOffer};
use catalog::find_word;
use crate::units::Quantity;

pub use parser::parse_intent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub raw_text: String,
    /// Canonical category (see [`catalog::canonical_category`]).
    pub category: Option<String>,
    pub budget: Option<Budget>,
    pub constraints: Vec<Constraint>,
    pub preferences: Vec<Preference>,
    /// Fragments the parser could not map to structured fields.
    pub residue: Vec<String>,
    pub search_queries: Vec<String>,
}

impl Intent {
    /// Attribute names the normalizer should report completeness for.
    pub fn expected_attributes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        };
        for c in &self.constraints {
            if !is_core_field(&c.attribute) && c.attribute != TEXT_KEY {
                push(&c.attribute);
            }
        }
        for p in &self.preferences {
            match &p.criterion {
                Criterion::AttributeMore(a) | Criterion::AttributeLess(a) => push(a),
                _ => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: String,
}

impl Budget {
    pub fn contains(&self, amount: f64) -> bool {
        self.min.map_or(true, |m| amount >= m) && self.max.map_or(true, |m| amount <= m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Eq,
    Ne,
    Gte,
    Lte,
    Contains,
    Excludes,
}

impl ConstraintOp {
    fn symbol(self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Ne => "!=",
            ConstraintOp::Gte => ">=",
            ConstraintOp::Lte => "<=",
            ConstraintOp::Contains => "contains",
            ConstraintOp::Excludes => "excludes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstraintValue {
    Quantity(Quantity),
    Number(f64),
    Text(String),
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Quantity(q) => write!(f, "{q}"),
            ConstraintValue::Number(n) => write!(f, "{n}"),
            ConstraintValue::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Key that makes a text predicate look at the whole listing text.
pub const TEXT_KEY: &str = "text";

/// Offer fields with a dedicated slot in [`NormalizedOffer`] (not in `attributes`).
pub const CORE_FIELDS: &[&str] = &[
    "category",
    "brand",
    "seller",
    "source_url",
    "rating",
    "review_count",
    "availability",
    "delivery_days",
    "warranty_months",
];

pub fn is_core_field(name: &str) -> bool {
    CORE_FIELDS.contains(&name) || name == "condition"
}

/// A predicate that must hold for an offer to be eligible at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub op: ConstraintOp,
    pub value: ConstraintValue,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOutcome {
    Satisfied,
    Violated,
    /// The offer does not carry the attribute (or carries an incomparable value).
    Unknown,
}

impl Constraint {
    pub fn new(attribute: impl Into<String>, op: ConstraintOp, value: ConstraintValue) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    /// Evaluate against a single offer. Pure; never looks at other offers.
    pub fn evaluate(&self, offer: &NormalizedOffer) -> ConstraintOutcome {
        if self.attribute == TEXT_KEY {
            return self.eval_text(&offer.searchable_text());
        }
        let Some(actual) = lookup(offer, &self.attribute) else {
            return ConstraintOutcome::Unknown;
        };
        match (&self.value, &actual) {
            (ConstraintValue::Quantity(want), AttrValue::Quantity(have)) => {
                if !want.comparable(have) {
                    return ConstraintOutcome::Unknown;
                }
                self.eval_number(have.value, want.value)
            }
            (ConstraintValue::Number(want), AttrValue::Number(have)) => {
                self.eval_number(*have, *want)
            }
            (ConstraintValue::Text(_), other) => self.eval_text(&other.text_view()),
            _ => ConstraintOutcome::Unknown,
        }
    }

    fn eval_number(&self, have: f64, want: f64) -> ConstraintOutcome {
        let ok = match self.op {
            ConstraintOp::Eq => (have - want).abs() < 1e-9,
            ConstraintOp::Ne => (have - want).abs() >= 1e-9,
            ConstraintOp::Gte => have >= want,
            ConstraintOp::Lte => have <= want,
            ConstraintOp::Contains | ConstraintOp::Excludes => return ConstraintOutcome::Unknown,
        };
        outcome(ok)
    }

    fn eval_text(&self, haystack: &str) -> ConstraintOutcome {
        let needle = match &self.value {
            ConstraintValue::Text(t) => t.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        let hay = haystack.to_lowercase();
        let ok = match self.op {
            ConstraintOp::Eq => hay.trim() == needle.trim(),
            ConstraintOp::Ne => hay.trim() != needle.trim(),
            ConstraintOp::Contains => find_word(&hay, needle.trim()).is_some(),
            ConstraintOp::Excludes => find_word(&hay, needle.trim()).is_none(),
            ConstraintOp::Gte | ConstraintOp::Lte => return ConstraintOutcome::Unknown,
        };
        outcome(ok)
    }
}

fn outcome(ok: bool) -> ConstraintOutcome {
    if ok {
        ConstraintOutcome::Satisfied
    } else {
        ConstraintOutcome::Violated
    }
}

/// Resolve a constraint key against the offer's typed slots, then its attributes.
fn lookup(offer: &NormalizedOffer, key: &str) -> Option<AttrValue> {
    match key {
        "category" => offer.identity.category.clone().map(AttrValue::Text),
        "brand" => offer.identity.brand.clone().map(AttrValue::Text),
        "seller" => offer.seller.clone().map(AttrValue::Text),
        "condition" => offer.condition.clone().map(AttrValue::Text),
        "source_url" => offer.provenance.source_url.clone().map(AttrValue::Text),
        "rating" => offer.rating.map(AttrValue::Number),
        "review_count" => offer.review_count.map(|n| AttrValue::Number(n as f64)),
        "availability" => offer
            .availability
            .map(|a| AttrValue::Text(a.as_str().to_string())),
        "delivery_days" => offer.delivery_days.map(|d| AttrValue::Number(d as f64)),
        "warranty_months" => offer.warranty_months.map(|m| AttrValue::Number(m as f64)),
        other => offer.attributes.get(other).cloned(),
    }
}

/// A weighted ranking criterion. Influences order, never eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Criterion {
    PriceValue,
    Rating,
    ReviewVolume,
    DeliverySpeed,
    BrandTrust,
    Warranty,
    PreferredBrand(String),
    /// Larger attribute value is better (e.g. storage).
    AttributeMore(String),
    /// Smaller attribute value is better (e.g. weight).
    AttributeLess(String),
    /// Unresolved free-text fragment; rewarded when the listing text mentions it.
    Keyword(String),
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::PriceValue => write!(f, "price_value"),
            Criterion::Rating => write!(f, "rating"),
            Criterion::ReviewVolume => write!(f, "review_volume"),
            Criterion::DeliverySpeed => write!(f, "delivery_speed"),
            Criterion::BrandTrust => write!(f, "brand_trust"),
            Criterion::Warranty => write!(f, "warranty"),
            Criterion::PreferredBrand(b) => write!(f, "preferred_brand:{b}"),
            Criterion::AttributeMore(a) => write!(f, "more:{a}"),
            Criterion::AttributeLess(a) => write!(f, "less:{a}"),
            Criterion::Keyword(k) => write!(f, "keyword:{k}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub criterion: Criterion,
    /// Raw weight as emitted by the parser; renormalized by the ranking engine.
    pub weight: f64,
    /// True when the preference came from an ambiguous fragment (reduced weight).
    pub fuzzy: bool,
}
