//! Offer builders shared by unit tests.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::normalize::{completeness_for, offer_id};
use crate::offer::{AttrValue, Availability, NormalizedOffer, Price, ProductIdentity, Provenance};
use crate::units::{Quantity, Unit};

pub(crate) fn fixed_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) struct OfferBuilder {
    offer: NormalizedOffer,
}

pub(crate) fn offer(source: &str, name: &str, price: f64) -> OfferBuilder {
    let ts = fixed_ts();
    OfferBuilder {
        offer: NormalizedOffer {
            id: String::new(),
            identity: ProductIdentity {
                name: name.to_string(),
                category: Some("laptop".into()),
                brand: None,
            },
            price: Price {
                amount: price,
                currency: "USD".into(),
                observed_at: ts,
            },
            seller: None,
            rating: None,
            review_count: None,
            availability: None,
            delivery_days: None,
            warranty_months: None,
            condition: None,
            attributes: BTreeMap::new(),
            provenance: Provenance {
                source_id: source.to_string(),
                source_url: None,
                fetched_at: ts,
            },
            completeness: BTreeMap::new(),
        },
    }
}

#[allow(dead_code)]
impl OfferBuilder {
    pub fn ram(self, gb: f64) -> Self {
        self.attr("ram", AttrValue::Quantity(Quantity::new(gb, Unit::Gigabyte)))
    }

    pub fn storage(self, gb: f64) -> Self {
        self.attr("storage", AttrValue::Quantity(Quantity::new(gb, Unit::Gigabyte)))
    }

    pub fn weight_kg(self, kg: f64) -> Self {
        self.attr("weight", AttrValue::Quantity(Quantity::new(kg, Unit::Kilogram)))
    }

    pub fn attr(mut self, key: &str, value: AttrValue) -> Self {
        self.offer.attributes.insert(key.to_string(), value);
        self
    }

    pub fn rating(mut self, r: f64) -> Self {
        self.offer.rating = Some(r);
        self
    }

    pub fn reviews(mut self, n: u64) -> Self {
        self.offer.review_count = Some(n);
        self
    }

    pub fn brand(mut self, b: &str) -> Self {
        self.offer.identity.brand = Some(b.to_string());
        self
    }

    pub fn seller(mut self, s: &str) -> Self {
        self.offer.seller = Some(s.to_string());
        self
    }

    pub fn delivery(mut self, days: u32) -> Self {
        self.offer.delivery_days = Some(days);
        self
    }

    pub fn warranty(mut self, months: u32) -> Self {
        self.offer.warranty_months = Some(months);
        self
    }

    pub fn in_stock(mut self) -> Self {
        self.offer.availability = Some(Availability::InStock);
        self
    }

    pub fn condition(mut self, c: &str) -> Self {
        self.offer.condition = Some(c.to_string());
        self
    }

    pub fn currency(mut self, c: &str) -> Self {
        self.offer.price.currency = c.to_string();
        self
    }

    pub fn url(mut self, u: &str) -> Self {
        self.offer.provenance.source_url = Some(u.to_string());
        self
    }

    pub fn observed_at(mut self, ts: DateTime<Utc>) -> Self {
        self.offer.price.observed_at = ts;
        self
    }

    pub fn build(mut self) -> NormalizedOffer {
        let o = &mut self.offer;
        o.id = offer_id(
            &o.provenance.source_id,
            &o.identity.name,
            o.provenance.source_url.as_deref(),
            o.price.amount,
        );
        o.completeness = completeness_for(o, &[]);
        self.offer
    }
}
