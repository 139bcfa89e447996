//! Per-schema field mappings. Each one turns a payload object into [`Fields`],
//! the schema-independent view the normalizer builds offers from.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::mining::{
    parse_condition, parse_count, parse_delivery_days, parse_rating, parse_warranty_months,
    rating_in_range,
};
use super::normalize_text;
use crate::offer::Availability;

/// Price exactly as a source wrote it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPrice {
    Number(f64),
    Text(String),
}

#[derive(Debug, Default, Clone)]
pub struct Fields {
    pub name: Option<String>,
    pub price: Option<RawPrice>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub brand: Option<String>,
    pub category_text: Option<String>,
    pub seller: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u64>,
    pub availability: Option<Availability>,
    pub delivery_days: Option<u32>,
    pub warranty_months: Option<u32>,
    pub condition: Option<String>,
    /// (label, value) pairs from a specs table, in source order.
    pub specs: Vec<(String, String)>,
    pub features: Vec<String>,
    pub description: Option<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

/// RSS product feed `<item>` flattened by the merchant feed adapter.
pub fn merchant_feed(obj: &Map<String, Value>) -> Fields {
    Fields {
        name: text(obj, &["title"]),
        price: price(obj, &["price"]),
        currency: None,
        url: text(obj, &["link"]),
        brand: text(obj, &["brand"]),
        category_text: text(obj, &["product_type"]),
        seller: text(obj, &["seller"]),
        rating: text(obj, &["rating"]).and_then(|r| parse_rating(&r)),
        review_count: text(obj, &["review_count"]).and_then(|r| parse_count(&r)),
        availability: text(obj, &["availability"]).and_then(|a| Availability::parse(&a)),
        delivery_days: text(obj, &["shipping_days"]).and_then(|d| parse_delivery_days(&d)),
        warranty_months: text(obj, &["warranty"]).and_then(|w| parse_warranty_months(&w)),
        condition: text(obj, &["condition"]),
        specs: specs(obj.get("specs")),
        features: list(obj, &["features"]),
        description: text(obj, &["description"]),
        observed_at: timestamp(obj, &["observed_at"]),
    }
    .with_title_condition()
}

/// One product object of a JSON search API.
pub fn json_catalog(obj: &Map<String, Value>) -> Fields {
    let (price, currency) = match pick(obj, &["price", "current_price"]) {
        Some(Value::Object(p)) => (
            price(p, &["amount", "value", "raw"]),
            text(p, &["currency", "currency_code"]),
        ),
        _ => (
            price(obj, &["price", "current_price"]),
            text(obj, &["currency", "currency_code"]),
        ),
    };
    let rating = match pick(obj, &["rating", "stars"]) {
        Some(Value::Number(n)) => n.as_f64().and_then(rating_in_range),
        Some(Value::String(s)) => parse_rating(s),
        _ => None,
    };
    let review_count = match pick(obj, &["reviews", "ratings_total", "review_count"]) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => parse_count(s),
        _ => None,
    };
    let availability = match pick(obj, &["in_stock", "stock", "availability"]) {
        Some(Value::Bool(true)) => Some(Availability::InStock),
        Some(Value::Bool(false)) => Some(Availability::OutOfStock),
        Some(Value::String(s)) => Availability::parse(s),
        _ => None,
    };
    let delivery_days = match pick(obj, &["delivery_days", "delivery", "shipping"]) {
        Some(Value::Number(n)) => n.as_u64().and_then(|d| u32::try_from(d).ok()),
        Some(Value::String(s)) => parse_delivery_days(s),
        _ => None,
    };
    let warranty_months = match pick(obj, &["warranty_months", "warranty"]) {
        Some(Value::Number(n)) => n.as_u64().and_then(|m| u32::try_from(m).ok()),
        Some(Value::String(s)) => parse_warranty_months(s),
        _ => None,
    };
    let seller = match pick(obj, &["seller", "merchant", "sold_by"]) {
        Some(Value::Object(s)) => text(s, &["name"]),
        Some(v) => scalar(v),
        None => None,
    };
    let category_text = match pick(obj, &["category", "breadcrumbs", "categories"]) {
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items.iter().filter_map(scalar).collect();
            (!parts.is_empty()).then(|| parts.join(" > "))
        }
        Some(v) => scalar(v),
        None => None,
    };
    let attrs = pick(obj, &["attributes", "specifications", "specs"]);

    Fields {
        name: text(obj, &["name", "title"]),
        price,
        currency,
        url: text(obj, &["url", "link"]),
        brand: text(obj, &["brand", "manufacturer"]),
        category_text,
        seller,
        rating,
        review_count,
        availability,
        delivery_days,
        warranty_months,
        condition: text(obj, &["condition"]),
        specs: specs(attrs),
        features: list(obj, &["features", "feature_bullets"]),
        description: text(obj, &["description"]),
        observed_at: timestamp(obj, &["observed_at", "updated_at"]),
    }
    .with_title_condition()
}

impl Fields {
    /// Titles like "(Renewed)" carry a condition the payload may not state.
    fn with_title_condition(mut self) -> Self {
        if self.condition.is_none() {
            self.condition = self
                .name
                .as_deref()
                .and_then(parse_condition)
                .filter(|c| *c != "new")
                .map(str::to_string);
        }
        self
    }
}

/// First non-null value among `keys`.
fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn scalar(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => normalize_text(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(scalar)
}

fn price(obj: &Map<String, Value>, keys: &[&str]) -> Option<RawPrice> {
    match pick(obj, keys)? {
        Value::Number(n) => n.as_f64().map(RawPrice::Number),
        Value::String(s) if !s.trim().is_empty() => Some(RawPrice::Text(s.trim().to_string())),
        _ => None,
    }
}

fn list(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match pick(obj, keys) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
        Some(v) => scalar(v).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Specs as an object (`{"RAM": "16 GB"}`) or a list of `{name, value}` pairs.
fn specs(v: Option<&Value>) -> Vec<(String, String)> {
    match v {
        Some(Value::Object(m)) => m
            .iter()
            .filter_map(|(k, v)| scalar(v).map(|v| (k.clone(), v)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|it| {
                let o = it.as_object()?;
                Some((text(o, &["name", "label", "key"])?, text(o, &["value"])?))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn timestamp(obj: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = text(obj, keys)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn json_catalog_accepts_alternate_shapes() {
        let f = json_catalog(&obj(json!({
            "title": "Acme Book 14 (Renewed)",
            "price": {"amount": "649.00", "currency": "usd"},
            "breadcrumbs": ["Computers", "Laptops"],
            "merchant": {"name": "Acme Direct"},
            "stars": 4.2,
            "ratings_total": "1,024",
            "in_stock": true,
            "delivery": "Next day",
            "warranty": "1 year",
            "specifications": [{"name": "RAM", "value": "16 GB"}],
            "feature_bullets": ["Backlit keyboard"]
        })));
        assert_eq!(f.name.as_deref(), Some("Acme Book 14 (Renewed)"));
        assert_eq!(f.price, Some(RawPrice::Text("649.00".into())));
        assert_eq!(f.currency.as_deref(), Some("usd"));
        assert_eq!(f.category_text.as_deref(), Some("Computers > Laptops"));
        assert_eq!(f.seller.as_deref(), Some("Acme Direct"));
        assert_eq!(f.rating, Some(4.2));
        assert_eq!(f.review_count, Some(1024));
        assert_eq!(f.availability, Some(Availability::InStock));
        assert_eq!(f.delivery_days, Some(1));
        assert_eq!(f.warranty_months, Some(12));
        assert_eq!(f.condition.as_deref(), Some("refurbished"));
        assert_eq!(f.specs, vec![("RAM".to_string(), "16 GB".to_string())]);
        assert_eq!(f.features, vec!["Backlit keyboard".to_string()]);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let f = json_catalog(&obj(json!({"name": "Bare", "price": 10, "rating": null})));
        assert_eq!(f.price, Some(RawPrice::Number(10.0)));
        assert!(f.rating.is_none());
        assert!(f.seller.is_none());
        assert!(f.delivery_days.is_none());
        assert!(f.condition.is_none());
    }

    #[test]
    fn out_of_range_numbers_are_absent_not_truncated() {
        let f = json_catalog(&obj(json!({
            "name": "Huge",
            "price": 10,
            "delivery_days": 5_000_000_000u64,
            "warranty_months": 4_294_967_296u64
        })));
        assert!(f.delivery_days.is_none());
        assert!(f.warranty_months.is_none());

        let f = json_catalog(&obj(json!({
            "name": "Slow",
            "price": 10,
            "delivery": "4000000000 weeks"
        })));
        assert!(f.delivery_days.is_none());
    }

    #[test]
    fn merchant_feed_reads_flattened_item() {
        let f = merchant_feed(&obj(json!({
            "title": "Lenovo IdeaPad 5",
            "price": "$749.99",
            "product_type": "Laptops",
            "rating": "4.4",
            "review_count": "210",
            "shipping_days": "2",
            "specs": {"Memory": "16 GB"},
            "features": ["Wi-Fi 6"],
            "observed_at": "2025-03-01T10:00:00+00:00"
        })));
        assert_eq!(f.price, Some(RawPrice::Text("$749.99".into())));
        assert_eq!(f.rating, Some(4.4));
        assert_eq!(f.review_count, Some(210));
        assert_eq!(f.delivery_days, Some(2));
        assert!(f.observed_at.is_some());
    }
}
