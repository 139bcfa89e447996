//! Free-text field parsers: prices, ratings, counts, delivery and warranty phrases,
//! and typed attributes mined from titles and feature bullets.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::intent::catalog::{attribute_word, find_word};
use crate::offer::AttrValue;
use crate::units::{quantity_from_parts, Quantity, Unit, UNIT_PATTERN};

static RE_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d.,'\s]*\d|\d").expect("amount regex"));
static RE_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(usd|eur|gbp|cad|aud|chf|jpy|sek|nok|dkk|pln|czk)\b").expect("iso regex")
});
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("number regex"));
static RE_RANGE_DAYS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:-|–|to)\s*(\d+)").expect("range regex"));
static RE_WARRANTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*-?\s*(years?|yrs?|months?|mos?)\b").expect("warranty regex")
});
static RE_MINED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r#"(?i)(\d+(?:[.,]\d+)?)\s*({UNIT_PATTERN})"#)).expect("mining regex")
});

/// Currency symbol or ISO code written in a price string.
pub fn currency_in(text: &str) -> Option<String> {
    if text.contains('$') {
        return Some("USD".into());
    }
    if text.contains('€') {
        return Some("EUR".into());
    }
    if text.contains('£') {
        return Some("GBP".into());
    }
    RE_ISO
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Parse "$1,299.99", "1.299,00 €", "699.00 USD" into (amount, currency if written).
/// `None` when the text carries no number at all.
pub fn parse_price_text(text: &str) -> Option<(f64, Option<String>)> {
    let currency = currency_in(text);
    let raw = RE_AMOUNT.find(text)?.as_str();
    let amount = parse_amount(raw, currency.as_deref())?;
    Some((amount, currency))
}

fn parse_amount(raw: &str, currency: Option<&str>) -> Option<f64> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '\'').collect();
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');
    let cleaned = match (last_dot, last_comma) {
        (Some(d), Some(c)) if d > c => s.replace(',', ""),
        (Some(_), Some(_)) => s.replace('.', "").replace(',', "."),
        (None, Some(c)) => {
            let decimals = s.len() - c - 1;
            if s.matches(',').count() == 1 && decimals != 3 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(d), None) => {
            let decimals = s.len() - d - 1;
            let eu = matches!(currency, Some("EUR" | "CHF" | "PLN" | "CZK" | "DKK" | "SEK" | "NOK"));
            if s.matches('.').count() > 1 || (decimals == 3 && eu) {
                s.replace('.', "")
            } else {
                s
            }
        }
        (None, None) => s,
    };
    cleaned.parse::<f64>().ok().map(round2)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Star rating on a 0..=5 scale ("4.5", "4.5 out of 5 stars").
pub fn parse_rating(text: &str) -> Option<f64> {
    let n: f64 = RE_NUMBER
        .find(text)?
        .as_str()
        .replace(',', ".")
        .parse()
        .ok()?;
    rating_in_range(n)
}

pub fn rating_in_range(n: f64) -> Option<f64> {
    (0.0..=5.0).contains(&n).then_some(n)
}

/// Review counts such as "1,204", "1.2k ratings" or "(87)".
pub fn parse_count(text: &str) -> Option<u64> {
    let t = text.trim().to_ascii_lowercase();
    let m = RE_AMOUNT.find(&t)?;
    let digits = m.as_str();
    if t[m.end()..].trim_start().starts_with('k') {
        let v: f64 = digits.replace(',', ".").parse().ok()?;
        return Some((v * 1000.0).round() as u64);
    }
    digits
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

/// Delivery promise in days. Ranges resolve to their upper bound.
pub fn parse_delivery_days(text: &str) -> Option<u32> {
    let t = text.to_lowercase();
    if t.contains("same day") || t.contains("today") {
        return Some(0);
    }
    if t.contains("next day") || t.contains("tomorrow") || t.contains("overnight") {
        return Some(1);
    }
    if let Some(c) = RE_RANGE_DAYS.captures(&t) {
        let a: u32 = c.get(1)?.as_str().parse().ok()?;
        let b: u32 = c.get(2)?.as_str().parse().ok()?;
        return Some(a.max(b));
    }
    let n: u32 = RE_NUMBER.find(&t)?.as_str().parse().ok()?;
    if t.contains("week") {
        return n.checked_mul(7);
    }
    Some(n)
}

/// Warranty phrase in months ("2-year", "24 months", "1 yr limited").
pub fn parse_warranty_months(text: &str) -> Option<u32> {
    let t = text.to_lowercase();
    if t.contains("no warranty") || t.trim() == "none" {
        return Some(0);
    }
    let c = RE_WARRANTY.captures(&t)?;
    let n: f64 = c.get(1)?.as_str().parse().ok()?;
    let months = if c.get(2)?.as_str().starts_with('y') {
        n * 12.0
    } else {
        n
    };
    Some(months.round() as u32)
}

/// Condition keyword from a field or, failing that, from the title.
pub fn parse_condition(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    if t.contains("refurbished") || t.contains("renewed") || t.contains("reconditioned") {
        Some("refurbished")
    } else if t.contains("open box") || t.contains("open-box") {
        Some("open_box")
    } else if t.contains("pre-owned") || t.contains("preowned") || find_word(&t, "used").is_some() {
        Some("used")
    } else if find_word(&t, "new").is_some() {
        Some("new")
    } else {
        None
    }
}

/// Typed value for a specs-table cell: a quantity when it has a unit, a number
/// when it is bare, text otherwise.
pub fn spec_value(raw: &str) -> AttrValue {
    let v = raw.trim();
    if let Some(q) = crate::units::parse_quantity(v) {
        return AttrValue::Quantity(q);
    }
    match v.to_ascii_lowercase().as_str() {
        "yes" | "true" => return AttrValue::Flag(true),
        "no" | "false" => return AttrValue::Flag(false),
        _ => {}
    }
    if let Ok(n) = v.replace(',', "").parse::<f64>() {
        return AttrValue::Number(n);
    }
    AttrValue::Text(v.to_string())
}

/// Attribute key a mined quantity belongs to, looking at the words around it.
fn mined_key(q: &Quantity, before: &str, after: &str, raw_unit: &str) -> Option<&'static str> {
    let word_after = after
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    let word_before = before
        .split(|c: char| !c.is_alphanumeric())
        .rfind(|w| !w.is_empty())
        .unwrap_or("");
    let hint = attribute_word(word_after).or_else(|| attribute_word(word_before));
    let v = q.value;
    match q.unit {
        Unit::Gigabyte => match hint {
            Some(k @ ("ram" | "storage")) => Some(k),
            _ if raw_unit.eq_ignore_ascii_case("tb") => Some("storage"),
            _ => None,
        },
        Unit::Inch if (5.0..=100.0).contains(&v) => Some("screen_size"),
        Unit::Kilogram if (0.05..=200.0).contains(&v) => Some("weight"),
        Unit::Hour if (1.0..=200.0).contains(&v) => Some("battery_life"),
        Unit::Hertz if (30.0..=1000.0).contains(&v) => Some("refresh_rate"),
        Unit::Gigahertz if (0.5..=10.0).contains(&v) => Some("cpu_clock"),
        Unit::Watt => Some("power"),
        Unit::MilliampHour => Some("battery_capacity"),
        _ => None,
    }
}

/// Quantities mentioned in free text, keyed by attribute. First mention wins;
/// bare gigabytes are skipped unless a word nearby says RAM or storage.
pub fn mine_attributes(texts: &[&str]) -> BTreeMap<String, AttrValue> {
    let mut out = BTreeMap::new();
    for text in texts {
        for c in RE_MINED.captures_iter(text) {
            let (Some(whole), Some(num), Some(unit)) = (c.get(0), c.get(1), c.get(2)) else {
                continue;
            };
            let after = &text[whole.end()..];
            if after.chars().next().is_some_and(|ch| ch.is_alphanumeric()) {
                continue;
            }
            let before_num = &text[..whole.start()];
            if before_num
                .chars()
                .next_back()
                .is_some_and(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
            {
                continue;
            }
            let number = thousands_free(num.as_str());
            let Some(q) = quantity_from_parts(&number, unit.as_str()) else {
                continue;
            };
            let lo = floor_boundary(before_num, before_num.len().saturating_sub(16));
            if let Some(key) = mined_key(&q, &before_num[lo..], after, unit.as_str()) {
                out.entry(key.to_string()).or_insert(AttrValue::Quantity(q));
            }
        }
    }
    out
}

/// "5,000" → "5000"; "1,8" stays a decimal.
fn thousands_free(num: &str) -> String {
    match num.split_once(',') {
        Some((_, tail)) if tail.len() == 3 => num.replace(',', ""),
        _ => num.to_string(),
    }
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
