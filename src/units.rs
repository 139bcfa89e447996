//! Measured quantities with canonical units.
//!
//! Every quantity is converted to one canonical unit per dimension at parse time
//! (data sizes → GB, mass → kg, length → inch, ...), so comparisons never have to
//! care which unit a source or a user happened to write.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical unit; one per physical dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Gigabyte,
    Kilogram,
    Inch,
    Watt,
    Hour,
    Gigahertz,
    Hertz,
    MilliampHour,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Gigabyte => "GB",
            Unit::Kilogram => "kg",
            Unit::Inch => "in",
            Unit::Watt => "W",
            Unit::Hour => "h",
            Unit::Gigahertz => "GHz",
            Unit::Hertz => "Hz",
            Unit::MilliampHour => "mAh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self {
            value: round3(value),
            unit,
        }
    }

    /// Same dimension → comparable. Different dimensions never compare.
    pub fn comparable(&self, other: &Quantity) -> bool {
        self.unit == other.unit
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.fract() == 0.0 {
            write!(f, "{} {}", self.value as i64, self.unit.symbol())
        } else {
            write!(f, "{} {}", self.value, self.unit.symbol())
        }
    }
}

/// Map a unit token (as written) to its canonical unit and conversion factor.
pub fn unit_token(token: &str) -> Option<(Unit, f64)> {
    let t = token.trim().trim_start_matches('-').to_ascii_lowercase();
    let hit = match t.as_str() {
        "mb" => (Unit::Gigabyte, 1.0 / 1024.0),
        "gb" => (Unit::Gigabyte, 1.0),
        "tb" => (Unit::Gigabyte, 1024.0),
        "g" | "gram" | "grams" => (Unit::Kilogram, 0.001),
        "kg" | "kgs" | "kilo" | "kilos" | "kilogram" | "kilograms" => (Unit::Kilogram, 1.0),
        "lb" | "lbs" | "pound" | "pounds" => (Unit::Kilogram, 0.453_592_37),
        "oz" | "ounce" | "ounces" => (Unit::Kilogram, 0.028_349_523),
        "\"" | "”" | "in" | "inch" | "inches" => (Unit::Inch, 1.0),
        "cm" => (Unit::Inch, 1.0 / 2.54),
        "w" | "watt" | "watts" => (Unit::Watt, 1.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => (Unit::Hour, 1.0),
        "ghz" => (Unit::Gigahertz, 1.0),
        "mhz" => (Unit::Gigahertz, 0.001),
        "hz" => (Unit::Hertz, 1.0),
        "mah" => (Unit::MilliampHour, 1.0),
        _ => return None,
    };
    Some(hit)
}

/// Regex fragment matching any unit token accepted by [`unit_token`].
/// Longer alternatives first so `gb` never shadows `ghz`-style prefixes.
pub const UNIT_PATTERN: &str = r#"(?:kilograms|kilogram|kilos|kilo|kgs|kg|grams|gram|pounds|pound|lbs|lb|ounces|ounce|oz|inches|inch|-inch|in|cm|watts|watt|w|hours|hour|hrs|hr|h|ghz|mhz|hz|mah|mb|gb|tb|g|"|”)"#;

static RE_QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)^\s*(\d+(?:[.,]\d+)?)\s*({UNIT_PATTERN})(?:$|[^a-z])"#
    ))
    .expect("quantity regex")
});

/// Parse a leading quantity such as `"16 GB"`, `"1TB"`, `"15.6\""` or `"3.5 lbs"`.
pub fn parse_quantity(s: &str) -> Option<Quantity> {
    let caps = RE_QUANTITY.captures(s)?;
    let value: f64 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
    let (unit, factor) = unit_token(caps.get(2)?.as_str())?;
    Some(Quantity::new(value * factor, unit))
}

/// Build a quantity from an already split number + unit token.
pub fn quantity_from_parts(number: &str, unit: &str) -> Option<Quantity> {
    let value: f64 = number.replace(',', ".").parse().ok()?;
    let (unit, factor) = unit_token(unit)?;
    Some(Quantity::new(value * factor, unit))
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!(parse_quantity("16GB"), Some(Quantity::new(16.0, Unit::Gigabyte)));
        assert_eq!(parse_quantity("1 TB SSD"), Some(Quantity::new(1024.0, Unit::Gigabyte)));
        assert_eq!(parse_quantity("15.6\""), Some(Quantity::new(15.6, Unit::Inch)));
        assert_eq!(parse_quantity("1,8 kg"), Some(Quantity::new(1.8, Unit::Kilogram)));
        assert_eq!(parse_quantity("144Hz panel"), Some(Quantity::new(144.0, Unit::Hertz)));
    }

    #[test]
    fn converts_to_canonical_units() {
        let q = parse_quantity("4 lbs").unwrap();
        assert_eq!(q.unit, Unit::Kilogram);
        assert!((q.value - 1.814).abs() < 1e-9);
        assert_eq!(parse_quantity("512 MB").unwrap().value, 0.5);
    }

    #[test]
    fn rejects_unitless_and_unknown() {
        assert_eq!(parse_quantity("16"), None);
        assert_eq!(parse_quantity("16 cores"), None);
        assert_eq!(parse_quantity("gb 16"), None);
    }

    #[test]
    fn display_drops_trailing_zero() {
        assert_eq!(Quantity::new(16.0, Unit::Gigabyte).to_string(), "16 GB");
        assert_eq!(Quantity::new(15.6, Unit::Inch).to_string(), "15.6 in");
    }
}
