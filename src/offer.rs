//! Source-agnostic offer records produced by the normalizer.
//!
//! Price and fetch timestamp are mandatory. Every other field is an `Option`
//! (or an absent map key) and is mirrored in [`NormalizedOffer::completeness`],
//! so "unknown" is always explicit and never a silent default.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::units::Quantity;

/// Stable offer id: `<source>-<12 hex chars>` derived from source, name, url and price.
pub type OfferId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Quantity(Quantity),
    Number(f64),
    Text(String),
    Flag(bool),
    List(Vec<String>),
}

impl AttrValue {
    pub fn as_quantity(&self) -> Option<Quantity> {
        match self {
            AttrValue::Quantity(q) => Some(*q),
            _ => None,
        }
    }

    /// Lowercased text view used by text predicates.
    pub fn text_view(&self) -> String {
        match self {
            AttrValue::Quantity(q) => q.to_string().to_lowercase(),
            AttrValue::Number(n) => n.to_string(),
            AttrValue::Text(t) => t.to_lowercase(),
            AttrValue::Flag(b) => b.to_string(),
            AttrValue::List(items) => items.join(" | ").to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Preorder,
    Backorder,
}

impl Availability {
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match t.as_str() {
            "in stock" | "instock" | "available" | "available now" => Some(Self::InStock),
            "out of stock" | "outofstock" | "sold out" | "unavailable" => Some(Self::OutOfStock),
            "preorder" | "pre order" => Some(Self::Preorder),
            "backorder" | "back order" => Some(Self::Backorder),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Preorder => "preorder",
            Self::Backorder => "backorder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    /// ISO 4217 code, uppercase.
    pub currency: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub source_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOffer {
    pub id: OfferId,
    pub identity: ProductIdentity,
    pub price: Price,
    pub seller: Option<String>,
    /// 0..=5 scale.
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub availability: Option<Availability>,
    pub delivery_days: Option<u32>,
    pub warranty_months: Option<u32>,
    pub condition: Option<String>,
    pub attributes: BTreeMap<String, AttrValue>,
    pub provenance: Provenance,
    /// Expected field/attribute name → present?
    pub completeness: BTreeMap<String, bool>,
}

impl NormalizedOffer {
    pub fn completeness_ratio(&self) -> f64 {
        if self.completeness.is_empty() {
            return 1.0;
        }
        let present = self.completeness.values().filter(|p| **p).count();
        present as f64 / self.completeness.len() as f64
    }

    pub fn missing_fields(&self) -> Vec<String> {
        self.completeness
            .iter()
            .filter(|(_, present)| !**present)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Everything a text predicate may look at: name, brand, condition and features.
    pub fn searchable_text(&self) -> String {
        let mut out = self.identity.name.to_lowercase();
        if let Some(b) = &self.identity.brand {
            out.push(' ');
            out.push_str(&b.to_lowercase());
        }
        if let Some(c) = &self.condition {
            out.push(' ');
            out.push_str(&c.to_lowercase());
        }
        if let Some(f) = self.attributes.get("features") {
            out.push(' ');
            out.push_str(&f.text_view());
        }
        out
    }
}
