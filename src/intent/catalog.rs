//! Shared vocabulary: product categories, known brands and attribute aliases.
//!
//! Both the intent parser and the extraction normalizer go through these tables,
//! so a user's "notebook" and a feed's "Laptops > Notebooks" land on the same key.

/// (canonical category, synonyms). Order matters: first hit wins.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "laptop",
        &["laptop", "laptops", "notebook", "notebooks", "ultrabook", "macbook", "chromebook"],
    ),
    ("tablet", &["tablet", "tablets", "ipad"]),
    ("smartphone", &["smartphone", "smartphones", "phone", "phones", "iphone"]),
    ("smartwatch", &["smartwatch", "smart watch", "fitness tracker"]),
    (
        "headphones",
        &["headphones", "headphone", "earbuds", "earphones", "headset"],
    ),
    ("monitor", &["monitor", "monitors"]),
    ("tv", &["tv", "tvs", "television", "televisions"]),
    ("camera", &["camera", "cameras", "dslr", "mirrorless"]),
    ("printer", &["printer", "printers"]),
    ("keyboard", &["keyboard", "keyboards"]),
    ("mouse", &["mouse", "mice"]),
    ("router", &["router", "routers", "mesh wifi"]),
    ("speaker", &["speaker", "speakers", "soundbar"]),
    ("office_chair", &["office chair", "desk chair", "ergonomic chair"]),
    ("desk", &["standing desk", "desk"]),
    ("vacuum", &["vacuum", "robot vacuum"]),
];

/// Lowercase brand names the parser recognises without further context.
pub const KNOWN_BRANDS: &[&str] = &[
    "apple", "lenovo", "dell", "hp", "asus", "acer", "msi", "samsung", "microsoft", "google",
    "sony", "lg", "razer", "huawei", "xiaomi", "bose", "logitech", "canon", "nikon", "brother",
    "epson", "framework", "gigabyte", "toshiba", "panasonic", "philips", "jbl", "sennheiser",
];

/// (canonical attribute key, aliases as written in specs tables / user text).
const ATTRIBUTES: &[(&str, &[&str])] = &[
    ("ram", &["ram", "memory", "system memory", "installed ram"]),
    (
        "storage",
        &["storage", "ssd", "hdd", "hard drive", "disk", "hard disk size", "capacity", "storage capacity"],
    ),
    ("screen_size", &["screen", "screen size", "display", "display size", "screen size (in)"]),
    ("weight", &["weight", "item weight", "product weight"]),
    ("battery_life", &["battery", "battery life"]),
    ("battery_capacity", &["battery capacity"]),
    ("refresh_rate", &["refresh rate"]),
    ("cpu_clock", &["cpu speed", "processor speed", "clock speed"]),
    ("power", &["power", "wattage"]),
    ("processor", &["processor", "cpu", "chip"]),
    ("color", &["color", "colour"]),
    ("os", &["os", "operating system"]),
];

/// Map free category text ("Electronics > Laptops") to a canonical category.
/// Picks the synonym that appears earliest in the text.
pub fn canonical_category(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    let mut best: Option<(usize, &'static str)> = None;
    for (canon, syns) in CATEGORIES {
        for s in *syns {
            if let Some(pos) = find_word(&t, s) {
                if best.map_or(true, |(p, _)| pos < p) {
                    best = Some((pos, canon));
                }
            }
        }
    }
    best.map(|(_, c)| c)
}

pub fn category_synonyms(canon: &str) -> &'static [&'static str] {
    CATEGORIES
        .iter()
        .find(|(c, _)| *c == canon)
        .map(|(_, syns)| *syns)
        .unwrap_or(&[])
}

/// Canonical attribute key for a specs label, if it is a known alias.
pub fn canonical_attribute(label: &str) -> Option<&'static str> {
    let l = label.trim().to_lowercase().replace(['_', '-'], " ");
    ATTRIBUTES
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|a| *a == l))
        .map(|(canon, _)| *canon)
}

/// Attribute keyword found in free text (used by the parser next to numbers).
pub fn attribute_word(word: &str) -> Option<&'static str> {
    match word.trim().to_lowercase().as_str() {
        "ram" | "memory" | "ddr4" | "ddr5" | "lpddr5" => Some("ram"),
        "ssd" | "storage" | "hdd" | "disk" | "nvme" | "emmc" => Some("storage"),
        "screen" | "display" | "panel" => Some("screen_size"),
        "battery" => Some("battery_life"),
        "weight" | "weighs" | "weighing" | "heavy" => Some("weight"),
        "refresh" => Some("refresh_rate"),
        _ => None,
    }
}

/// Snake-case fallback key for unknown specs labels.
pub fn attribute_key(label: &str) -> String {
    if let Some(c) = canonical_attribute(label) {
        return c.to_string();
    }
    let mut out = String::with_capacity(label.len());
    let mut prev_us = false;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Known brand mentioned as a whole word in `text` (earliest mention wins).
pub fn find_brand(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    KNOWN_BRANDS
        .iter()
        .filter_map(|b| find_word(&t, b).map(|pos| (pos, *b)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, b)| b)
}

/// Byte offset of `needle` in `hay` when bounded by non-alphanumerics.
pub fn find_word(hay: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let mut start = 0;
    while let Some(rel) = hay[start..].find(needle) {
        let pos = start + rel;
        let end = pos + needle.len();
        let before_ok = hay[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = hay[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(pos);
        }
        start = pos + needle.len();
        if start >= hay.len() {
            break;
        }
    }
    None
}

/// Title-case a lowercase brand key for display ("hp" stays upper-case).
pub fn display_brand(brand: &str) -> String {
    if brand.len() <= 3 {
        return brand.to_uppercase();
    }
    let mut cs = brand.chars();
    match cs.next() {
        Some(first) => first.to_uppercase().chain(cs).collect(),
        None => String::new(),
    }
}
