//! # Brand trust
//!
//! Maps a brand name (as a listing spells it) to a trust weight in `[0.0, 1.0]`.
//!
//! - Case-insensitive lookup with punctuation and dashes normalized away.
//! - Aliases map sub-brands and legal names to a canonical brand.
//! - Fallback order: aliases → exact match → word-prefix match → default.
//! - Unknown brands get the default; a missing brand is handled by the caller.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BrandTrustTable {
    /// Weight for a brand that is present but not listed.
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Alias → canonical brand.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    0.50
}

impl Default for BrandTrustTable {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl BrandTrustTable {
    pub fn weight_for(&self, brand: &str) -> f64 {
        let b = normalize(brand);

        if let Some(canon) = self.aliases.get(&b) {
            if let Some(&w) = self.weights.get(&normalize(canon)) {
                return clamp01(w);
            }
        }

        if let Some(&w) = self.weights.get(&b) {
            return clamp01(w);
        }

        // "Lenovo Group Ltd" → "lenovo"
        if let Some(first) = b.split(' ').next() {
            if let Some(&w) = self.weights.get(first) {
                return clamp01(w);
            }
        }

        clamp01(self.default_weight)
    }

    /// Built-in table for common consumer electronics brands.
    pub fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("apple", 0.95),
            ("lenovo", 0.88),
            ("dell", 0.88),
            ("hp", 0.82),
            ("asus", 0.82),
            ("acer", 0.75),
            ("msi", 0.78),
            ("samsung", 0.90),
            ("microsoft", 0.88),
            ("google", 0.86),
            ("sony", 0.90),
            ("lg", 0.84),
            ("razer", 0.78),
            ("framework", 0.80),
            ("bose", 0.90),
            ("logitech", 0.85),
            ("canon", 0.88),
            ("nikon", 0.86),
            ("brother", 0.80),
            ("epson", 0.78),
            ("sennheiser", 0.88),
            ("jbl", 0.80),
            ("xiaomi", 0.74),
            ("huawei", 0.72),
            ("toshiba", 0.70),
            ("gigabyte", 0.74),
        ] {
            weights.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("thinkpad", "lenovo"),
            ("lenovo group", "lenovo"),
            ("alienware", "dell"),
            ("hewlett packard", "hp"),
            ("hp inc", "hp"),
            ("rog", "asus"),
            ("asustek", "asus"),
            ("predator", "acer"),
            ("surface", "microsoft"),
            ("pixel", "google"),
            ("beats", "apple"),
            ("samsung electronics", "samsung"),
            ("redmi", "xiaomi"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_weight: default_default_weight(),
            weights,
            aliases,
        }
    }
}

/// Lowercase, punctuation and dashes to spaces, collapsed whitespace.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['.', ',', '\'', '®', '™'], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_and_prefix() {
        let t = BrandTrustTable::default_seed();
        assert!((t.weight_for("Lenovo") - 0.88).abs() < 1e-9);
        assert!((t.weight_for("ThinkPad") - 0.88).abs() < 1e-9);
        assert!((t.weight_for("Hewlett-Packard") - 0.82).abs() < 1e-9);
        assert!((t.weight_for("Dell Technologies Inc.") - 0.88).abs() < 1e-9);
    }

    #[test]
    fn unknown_brand_gets_default() {
        let t = BrandTrustTable::default_seed();
        assert!((t.weight_for("Acme") - 0.50).abs() < 1e-9);
    }

    #[test]
    fn weights_are_clamped() {
        let mut t = BrandTrustTable::default_seed();
        t.weights.insert("hype".into(), 3.0);
        assert_eq!(t.weight_for("HYPE"), 1.0);
    }
}
