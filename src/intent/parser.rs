//! Rule-based intent parser: free text → [`Intent`].
//!
//! Works on a lowercased copy of the query. Each recognised phrase is masked out
//! (replaced by spaces) so later passes never read it twice; whatever survives
//! every pass becomes residue and turns into low-weight keyword preferences.
//!
//! Pass order: budget → quantity constraints → must-have / exclusion / stock →
//! soft preferences → brand → category → residue.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::catalog::{self, attribute_word, display_brand, find_word, KNOWN_BRANDS};
use super::{
    Budget, Constraint, ConstraintOp, ConstraintValue, Criterion, Intent, Preference, TEXT_KEY,
};
use crate::error::PipelineError;
use crate::units::{quantity_from_parts, unit_token, Unit, UNIT_PATTERN};

/// Budget currency when the query names an amount but no currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Weight given to every keyword left over in the residue.
pub const FUZZY_WEIGHT: f64 = 0.05;
const MAX_FUZZY_KEYWORDS: usize = 3;
const MAX_SEARCH_QUERIES: usize = 5;

const NUM: &str = r"((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)";
const CUR_CODE: &str = r"(usd|euros?|eur|gbp|dollars?|bucks)";
const ATTR: &str = r"ram|memory|ddr4|ddr5|lpddr5|ssd|storage|hdd|disk|nvme|emmc|screen|display|panel|battery(?:\s+life)?|weight|refresh(?:\s+rate)?";

fn build(pattern: &str) -> Regex {
    let p = pattern
        .replace("NUM", NUM)
        .replace("CODE", CUR_CODE)
        .replace("UNIT", UNIT_PATTERN)
        .replace("ATTR", ATTR);
    Regex::new(&p).expect("intent parser regex")
}

static RE_BETWEEN: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:between|from)\s+([$€£])?\s*NUM\s*(k\b)?\s*(?:and|to|-|–)\s*([$€£])?\s*NUM\s*(k\b)?\s*CODE?")
});
static RE_RANGE: Lazy<Regex> =
    Lazy::new(|| build(r"([$€£])\s*NUM\s*(k\b)?\s*(?:-|–|to)\s*([$€£])?\s*NUM\s*(k\b)?"));
static RE_MAX: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:under|below|less than|up to|no more than|not more than|at most|maximum|max|within|cheaper than|budget(?:\s+(?:of|is))?:?)\s*([$€£])?\s*NUM\s*(k\b)?\s*CODE?")
});
static RE_MIN: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:over|above|more than|at least|minimum|min|starting at)\s*([$€£])?\s*NUM\s*(k\b)?\s*CODE?")
});
static RE_AROUND: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:around|about|approximately|roughly|~)\s*([$€£])?\s*NUM\s*(k\b)?\s*CODE?")
});
static RE_BARE_PRICE: Lazy<Regex> = Lazy::new(|| build(r"([$€£])\s*NUM\s*(k\b)?"));

static RE_Q_PREFIXED: Lazy<Regex> = Lazy::new(|| {
    build(r#"(?:(?P<lead>(?:ATTR|weighs?|weighing)\b)\s+(?:of\s+)?)?(?:(?P<gte>at least|minimum of|minimum|min|no less than|more than|greater than|over|>=)|(?P<lte>at most|maximum of|maximum|max|no more than|less than|lighter than|smaller than|under|below|up to|<=))\s*(?P<num>\d+(?:\.\d+)?)\s*(?P<unit>UNIT)(?:[^a-z0-9]|$)\s*(?:of\s+)?(?P<trail>(?:ATTR)\b)?"#)
});
static RE_Q_PLUS: Lazy<Regex> = Lazy::new(|| {
    build(r"(?P<num>\d+(?:\.\d+)?)\s*(?P<unit>UNIT)\s*\+\s*(?:of\s+)?(?P<trail>(?:ATTR)\b)?")
});
static RE_Q_PLAIN: Lazy<Regex> = Lazy::new(|| {
    build(r"(?P<num>\d+(?:\.\d+)?)\s*(?P<unit>UNIT)(?:[^a-z0-9+]|$)\s*(?:of\s+)?(?P<trail>(?:ATTR)\b)?")
});

static RE_MUST: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:must have|must include|must support|needs? to have|has to have|requires?|required:?)\s+(?:a\s+|an\s+)?([a-z0-9][a-z0-9 /\-]{1,40}?)\s*(?:,|;|\.|!|\band\b|\bwith\b|\bbut\b|$)")
});
static RE_NOT_CONDITION: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:\bno\b|\bnot\b|without|avoid|exclude|excluding|\bnon\b)[\s\-]+(refurbished|renewed|used|open[\s\-]box|pre-?owned)")
});
static RE_IN_STOCK: Lazy<Regex> =
    Lazy::new(|| build(r"(?:must be\s+|only\s+)?(?:in[\s\-]stock|available now)"));

/// (phrase regex, criterion, base weight)
static SOFT_RULES: Lazy<Vec<(Regex, Criterion, f64)>> = Lazy::new(|| {
    vec![
        (
            build(r"fast (?:delivery|shipping)|quick (?:delivery|shipping)|next[\s\-]day|same[\s\-]day|ships? fast|deliver(?:ed|y)? (?:by|before|quickly|soon)|\basap\b|urgent(?:ly)?"),
            Criterion::DeliverySpeed,
            0.25,
        ),
        (
            build(r"trusted|reputable|reliable brand|well[\s\-]known brand|brand trust|good brand|name brand"),
            Criterion::BrandTrust,
            0.2,
        ),
        (
            build(r"highly rated|well[\s\-]reviewed|good reviews|great reviews|best rated|top[\s\-]rated|high rating|good rating"),
            Criterion::Rating,
            0.25,
        ),
        (
            build(r"popular|best[\s\-]?sell(?:er|ing)|many reviews|lots of reviews|widely used"),
            Criterion::ReviewVolume,
            0.15,
        ),
        (build(r"warranty|guarantee"), Criterion::Warranty, 0.2),
        (
            build(r"cheapest|cheap|affordable|inexpensive|best value|good value|value for money|bang for (?:the |your )?buck|budget[\s\-]friendly|low price"),
            Criterion::PriceValue,
            0.3,
        ),
        (
            build(r"lightweight|light weight|portable|thin and light|easy to carry"),
            Criterion::AttributeLess("weight".into()),
            0.15,
        ),
        (
            build(r"(?:more|lots of|large|plenty of|extra) storage"),
            Criterion::AttributeMore("storage".into()),
            0.15,
        ),
        (
            build(r"(?:more|lots of|extra) (?:ram|memory)"),
            Criterion::AttributeMore("ram".into()),
            0.15,
        ),
        (
            build(r"big(?:ger)? (?:screen|display)|large(?:r)? (?:screen|display)"),
            Criterion::AttributeMore("screen_size".into()),
            0.15,
        ),
        (
            build(r"long(?:er)? battery(?: life)?|all[\s\-]day battery|great battery(?: life)?|good battery life"),
            Criterion::AttributeMore("battery_life".into()),
            0.15,
        ),
    ]
});

static RE_INTENSIFIER: Lazy<Regex> = Lazy::new(|| {
    build(r"(?:very|really|especially|most importantly|important|critical|must)\W*(?:\w+\W+){0,2}$")
});
static RE_SOFTENER: Lazy<Regex> =
    Lazy::new(|| build(r"(?:nice to have|bonus|if possible|ideally|optionally)"));
static RE_SPLIT: Lazy<Regex> = Lazy::new(|| build(r"[,.;!?()]|\band\b|\bbut\b|\bor\b"));

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "i", "im", "i'm", "me", "my", "we", "our", "you", "your", "it", "its",
    "is", "are", "be", "to", "of", "in", "on", "for", "with", "that", "this", "those", "these",
    "from", "by", "at", "as", "so", "if", "also", "just", "really", "very", "need", "needs",
    "want", "wants", "looking", "look", "buy", "buying", "purchase", "find", "get", "some",
    "something", "anything", "please", "would", "like", "should", "could", "can", "thing",
    "things", "stuff", "good", "great", "best", "new", "one", "which", "what", "who", "have",
    "has", "must", "under", "over", "around", "about", "preferred", "prefer", "ideally",
    "preferably", "work", "use", "using", "budget", "price", "cost", "costs", "dollars", "usd",
    "eur", "gbp", "bucks", "than", "less", "more", "least", "most", "max", "min", "maybe",
];

/// Parse a natural-language purchasing request.
///
/// Never fails on ambiguity: unresolved fragments become fuzzy preferences.
/// Fails only on empty input or input without any purchasing signal.
pub fn parse_intent(text: &str) -> Result<Intent, PipelineError> {
    let raw = collapse_ws(text);
    if raw.is_empty() {
        return Err(PipelineError::invalid_intent("empty query"));
    }

    let mut sc = Scanner::new(&raw.to_lowercase());

    let budget = sc.budget();
    let mut constraints = sc.quantity_constraints();
    constraints.extend(sc.exclusions());
    constraints.extend(sc.must_haves());
    constraints.extend(sc.stock());

    let mut preferences = sc.soft_preferences();
    preferences.extend(sc.brand_preferences());

    let category = sc.category();
    let (residue, keywords) = sc.residue();

    let has_signal = category.is_some()
        || budget.is_some()
        || !constraints.is_empty()
        || preferences.iter().any(|p| !p.fuzzy);
    if !has_signal {
        return Err(PipelineError::invalid_intent(
            "no purchasing signal (category, budget or requirement) found",
        ));
    }

    for k in keywords.into_iter().take(MAX_FUZZY_KEYWORDS) {
        preferences.push(Preference {
            criterion: Criterion::Keyword(k),
            weight: FUZZY_WEIGHT,
            fuzzy: true,
        });
    }

    let search_queries = search_queries(&raw, category.as_deref(), &constraints, &preferences);

    Ok(Intent {
        raw_text: raw,
        category,
        budget,
        constraints,
        preferences,
        residue,
        search_queries,
    })
}

struct Scanner {
    work: String,
}

impl Scanner {
    fn new(lower: &str) -> Self {
        Self {
            work: lower.to_string(),
        }
    }

    fn mask(&mut self, start: usize, end: usize) {
        let n = self.work[start..end].len();
        self.work.replace_range(start..end, &" ".repeat(n));
    }

    /// Next word after `end` is a measurement unit ("under 2 kg" is not a budget).
    fn followed_by_unit(&self, end: usize) -> bool {
        let rest = self.work[end..].trim_start();
        let token: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || *c == '"' || *c == '”')
            .collect();
        !token.is_empty() && unit_token(&token).is_some()
    }

    fn budget(&mut self) -> Option<Budget> {
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        let mut currency: Option<&'static str> = None;

        // between X and Y / $X-$Y
        for re in [&*RE_BETWEEN, &*RE_RANGE] {
            if max.is_some() {
                break;
            }
            let hit = re.captures(&self.work).and_then(|c| {
                let m = c.get(0)?;
                if self.followed_by_unit(m.end()) {
                    return None;
                }
                let lo = amount(c.get(2)?.as_str(), c.get(3).is_some())?;
                let hi = amount(c.get(5)?.as_str(), c.get(6).is_some())?;
                let cur = currency_of(
                    c.get(1).or(c.get(4)).map(|m| m.as_str()),
                    c.get(7).map(|m| m.as_str()),
                );
                Some((m.start(), m.end(), lo.min(hi), lo.max(hi), cur))
            });
            if let Some((s, e, lo, hi, cur)) = hit {
                min = Some(lo);
                max = Some(hi);
                currency = currency.or(cur);
                self.mask(s, e);
            }
        }

        if max.is_none() {
            if let Some((s, e, v, cur)) = self.single_amount(&RE_MAX, false) {
                max = Some(v);
                currency = currency.or(cur);
                self.mask(s, e);
            }
        }
        if min.is_none() {
            if let Some((s, e, v, cur)) = self.single_amount(&RE_MIN, true) {
                min = Some(v);
                currency = currency.or(cur);
                self.mask(s, e);
            }
        }
        if min.is_none() && max.is_none() {
            if let Some((s, e, v, cur)) = self.single_amount(&RE_AROUND, false) {
                min = Some(round2(v * 0.85));
                max = Some(round2(v * 1.15));
                currency = currency.or(cur);
                self.mask(s, e);
            }
        }
        if max.is_none() {
            if let Some((s, e, v, cur)) = self.single_amount(&RE_BARE_PRICE, false) {
                max = Some(v);
                currency = currency.or(cur);
                self.mask(s, e);
            }
        }

        if min.is_none() && max.is_none() {
            return None;
        }
        Some(Budget {
            min,
            max,
            currency: currency.unwrap_or(DEFAULT_CURRENCY).to_string(),
        })
    }

    /// First acceptable match of a one-amount budget pattern.
    /// Groups: 1 = symbol, 2 = number, 3 = k, 4 = code (bare price has no code).
    fn single_amount(
        &self,
        re: &Regex,
        needs_currency: bool,
    ) -> Option<(usize, usize, f64, Option<&'static str>)> {
        for c in re.captures_iter(&self.work) {
            let Some(m) = c.get(0) else { continue };
            if self.followed_by_unit(m.end()) {
                continue;
            }
            let sym = c.get(1).map(|m| m.as_str());
            let code = c.get(4).map(|m| m.as_str());
            if needs_currency && sym.is_none() && code.is_none() {
                continue;
            }
            let Some(v) = c.get(2).and_then(|n| amount(n.as_str(), c.get(3).is_some())) else {
                continue;
            };
            return Some((m.start(), m.end(), v, currency_of(sym, code)));
        }
        None
    }

    fn quantity_constraints(&mut self) -> Vec<Constraint> {
        let mut out = Vec::new();
        for (re, default_op) in [
            (&*RE_Q_PREFIXED, None),
            (&*RE_Q_PLUS, Some(ConstraintOp::Gte)),
            (&*RE_Q_PLAIN, None),
        ] {
            let found: Vec<(usize, usize, Constraint)> = re
                .captures_iter(&self.work)
                .filter_map(|c| {
                    let m = c.get(0)?;
                    quantity_constraint(&c, default_op).map(|k| (m.start(), m.end(), k))
                })
                .collect();
            for (s, e, k) in found {
                self.mask(s, e);
                out.push(k);
            }
        }
        out
    }

    fn exclusions(&mut self) -> Vec<Constraint> {
        let found: Vec<(usize, usize, String)> = RE_NOT_CONDITION
            .captures_iter(&self.work)
            .filter_map(|c| {
                let m = c.get(0)?;
                let word = c.get(1)?.as_str().replace(['-', ' '], " ");
                Some((m.start(), m.end(), word))
            })
            .collect();
        let mut out = Vec::new();
        for (s, e, word) in found {
            self.mask(s, e);
            out.push(Constraint::new(
                TEXT_KEY,
                ConstraintOp::Excludes,
                ConstraintValue::Text(word),
            ));
        }

        // "avoid hp", "no acer"
        for brand in KNOWN_BRANDS {
            for prefix in ["avoid ", "not ", "no ", "except ", "excluding ", "anything but "] {
                let phrase = format!("{prefix}{brand}");
                if let Some(pos) = find_word(&self.work, &phrase) {
                    self.mask(pos, pos + phrase.len());
                    out.push(Constraint::new(
                        TEXT_KEY,
                        ConstraintOp::Excludes,
                        ConstraintValue::Text((*brand).to_string()),
                    ));
                }
            }
        }
        out
    }

    fn must_haves(&mut self) -> Vec<Constraint> {
        let found: Vec<(usize, usize, String)> = RE_MUST
            .captures_iter(&self.work)
            .filter_map(|c| {
                let m = c.get(0)?;
                let feature = collapse_ws(c.get(1)?.as_str());
                if feature.is_empty() {
                    return None;
                }
                Some((m.start(), m.end(), feature))
            })
            .collect();
        let mut out = Vec::new();
        for (s, e, feature) in found {
            self.mask(s, e);
            out.push(Constraint::new(
                TEXT_KEY,
                ConstraintOp::Contains,
                ConstraintValue::Text(feature),
            ));
        }
        out
    }

    fn stock(&mut self) -> Option<Constraint> {
        let m = RE_IN_STOCK.find(&self.work)?;
        let (s, e) = (m.start(), m.end());
        self.mask(s, e);
        Some(Constraint::new(
            "availability",
            ConstraintOp::Eq,
            ConstraintValue::Text("in_stock".into()),
        ))
    }

    fn soft_preferences(&mut self) -> Vec<Preference> {
        let mut out: Vec<Preference> = Vec::new();
        for (re, criterion, base) in SOFT_RULES.iter() {
            let Some(m) = re.find(&self.work) else { continue };
            let (s, e) = (m.start(), m.end());
            let weight = base * self.emphasis(s, e);
            self.mask(s, e);
            match out.iter_mut().find(|p| &p.criterion == criterion) {
                Some(p) => p.weight = p.weight.max(weight),
                None => out.push(Preference {
                    criterion: criterion.clone(),
                    weight,
                    fuzzy: false,
                }),
            }
        }
        out
    }

    /// Multiplier from nearby intensifiers ("very", "must") or softeners ("ideally").
    fn emphasis(&self, start: usize, end: usize) -> f64 {
        let mut lo = start.saturating_sub(30);
        while !self.work.is_char_boundary(lo) {
            lo += 1;
        }
        let mut hi = (end + 20).min(self.work.len());
        while !self.work.is_char_boundary(hi) {
            hi -= 1;
        }
        let before = &self.work[lo..start];
        let after = &self.work[end..hi];
        if RE_INTENSIFIER.is_match(before) {
            1.5
        } else if RE_SOFTENER.is_match(before) || RE_SOFTENER.is_match(after) {
            0.6
        } else {
            1.0
        }
    }

    fn brand_preferences(&mut self) -> Vec<Preference> {
        let mut out = Vec::new();
        let Some(brand) = catalog::find_brand(&self.work) else {
            return out;
        };
        if let Some(pos) = find_word(&self.work, brand) {
            let weight = 0.2 * self.emphasis(pos, pos + brand.len());
            self.mask(pos, pos + brand.len());
            out.push(Preference {
                criterion: Criterion::PreferredBrand(display_brand(brand)),
                weight,
                fuzzy: false,
            });
        }
        out
    }

    fn category(&mut self) -> Option<String> {
        let cat = catalog::canonical_category(&self.work)?;
        // mask every synonym hit so the residue stays clean
        for syn in catalog::category_synonyms(cat) {
            while let Some(pos) = find_word(&self.work, syn) {
                self.mask(pos, pos + syn.len());
            }
        }
        Some(cat.to_string())
    }

    /// Leftover fragments plus the content words that become fuzzy keywords.
    fn residue(&self) -> (Vec<String>, Vec<String>) {
        let mut fragments = Vec::new();
        let mut keywords: Vec<String> = Vec::new();
        for frag in RE_SPLIT.split(&self.work) {
            let words: Vec<&str> = frag
                .split_whitespace()
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
                .filter(|w| !w.is_empty())
                .collect();
            let content: Vec<&str> = words
                .iter()
                .copied()
                .filter(|w| !STOPWORDS.contains(w))
                .collect();
            if content.is_empty() {
                continue;
            }
            fragments.push(words.join(" "));
            for w in content {
                let is_word = w.len() >= 4 && w.chars().all(|c| c.is_ascii_alphabetic() || c == '-');
                if is_word && !keywords.iter().any(|k| k == w) {
                    keywords.push(w.to_string());
                }
            }
        }
        (fragments, keywords)
    }
}

fn quantity_constraint(c: &Captures<'_>, default_op: Option<ConstraintOp>) -> Option<Constraint> {
    let q = quantity_from_parts(c.name("num")?.as_str(), c.name("unit")?.as_str())?;
    let named = c
        .name("trail")
        .or(c.name("lead"))
        .and_then(|m| m.as_str().split_whitespace().next())
        .and_then(attribute_word);
    let attribute = named.unwrap_or_else(|| inferred_attribute(q.unit, q.value));
    let op = if c.name("gte").is_some() {
        ConstraintOp::Gte
    } else if c.name("lte").is_some() {
        ConstraintOp::Lte
    } else if let Some(op) = default_op {
        op
    } else if q.unit == Unit::Kilogram {
        ConstraintOp::Lte
    } else {
        ConstraintOp::Gte
    };
    Some(Constraint::new(attribute, op, ConstraintValue::Quantity(q)))
}

/// Attribute implied by a unit when the text does not name one.
fn inferred_attribute(unit: Unit, value: f64) -> &'static str {
    match unit {
        Unit::Gigabyte if value <= 64.0 => "ram",
        Unit::Gigabyte => "storage",
        Unit::Kilogram => "weight",
        Unit::Inch => "screen_size",
        Unit::Watt => "power",
        Unit::Hour => "battery_life",
        Unit::Gigahertz => "cpu_clock",
        Unit::Hertz => "refresh_rate",
        Unit::MilliampHour => "battery_capacity",
    }
}

fn amount(num: &str, thousands: bool) -> Option<f64> {
    let v: f64 = num.replace(',', "").parse().ok()?;
    if v <= 0.0 {
        return None;
    }
    Some(round2(if thousands { v * 1000.0 } else { v }))
}

fn currency_of(symbol: Option<&str>, code: Option<&str>) -> Option<&'static str> {
    if let Some(s) = symbol {
        return match s {
            "$" => Some("USD"),
            "€" => Some("EUR"),
            "£" => Some("GBP"),
            _ => None,
        };
    }
    match code? {
        "usd" | "dollar" | "dollars" | "bucks" => Some("USD"),
        "eur" | "euro" | "euros" => Some("EUR"),
        "gbp" => Some("GBP"),
        _ => None,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 3–5 search strings for catalog sources: the query itself, a category+spec
/// query and generic "best …" / "… top rated" variants.
fn search_queries(
    raw: &str,
    category: Option<&str>,
    constraints: &[Constraint],
    preferences: &[Preference],
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |q: String| {
        let q = collapse_ws(&q);
        if !q.is_empty() && !out.iter().any(|x| x.eq_ignore_ascii_case(&q)) {
            out.push(q);
        }
    };

    let base: String = raw.chars().take(80).collect();
    push(base.clone());

    match category {
        Some(cat) => {
            let cat = cat.replace('_', " ");
            let brand = preferences.iter().find_map(|p| match &p.criterion {
                Criterion::PreferredBrand(b) => Some(b.clone()),
                _ => None,
            });
            let specs: Vec<String> = constraints
                .iter()
                .filter_map(|c| match &c.value {
                    ConstraintValue::Quantity(q) if c.op == ConstraintOp::Gte => {
                        Some(format!("{q} {}", c.attribute.replace('_', " ")))
                    }
                    _ => None,
                })
                .take(2)
                .collect();
            if !specs.is_empty() {
                push(format!("{cat} {}", specs.join(" ")));
            }
            if let Some(b) = &brand {
                push(format!("{b} {cat}"));
            }
            push(format!("best {cat}"));
            push(format!("{cat} top rated"));
        }
        None => {
            push(format!("best {base}"));
            push(format!("{base} top rated"));
        }
    }
    out.truncate(MAX_SEARCH_QUERIES);
    out
}
