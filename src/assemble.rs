//! Result assembler: ranked offers + trace + data quality → [`RecommendationSet`].
//!
//! Pure apart from the `now` it is handed; freshness is measured against it.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::config::RankingConfig;
use crate::error::{ExtractionFailure, PipelineError};
use crate::intent::Intent;
use crate::offer::{NormalizedOffer, OfferId};
use crate::rank::Ranking;
use crate::recommendation::{
    DataQualityReport, Freshness, OverlayStatus, Recommendation, RecommendationSet, ScoredOffer,
    SourceReport, TaskState,
};

const PRO_THRESHOLD: f64 = 0.75;
const CON_THRESHOLD: f64 = 0.35;
const MAX_PROS: usize = 3;
const MAX_CONS: usize = 3;
const SUMMARY_TOP: usize = 3;

/// Everything the crawl and normalize stages learned about data quality.
#[derive(Debug, Clone, Default)]
pub struct CrawlQuality {
    pub sources: Vec<SourceReport>,
    pub deadline_hit: bool,
    pub listings_seen: usize,
    pub dropped: BTreeMap<String, BTreeMap<ExtractionFailure, usize>>,
    pub duplicates: BTreeMap<String, usize>,
}

pub fn assemble(
    run_id: String,
    intent: Intent,
    ranking: Ranking,
    crawl: CrawlQuality,
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> Result<RecommendationSet, PipelineError> {
    let Ranking {
        mut ranked,
        excluded,
        considered,
        trace,
        justifications,
        tradeoffs,
        summary,
    } = ranking;

    if ranked.is_empty() {
        return Err(PipelineError::NoEligibleOffers {
            considered,
            excluded: excluded.len(),
        });
    }
    if config.max_results > 0 {
        ranked.truncate(config.max_results);
    }

    let stale_after_secs = config
        .stale_after_hours
        .checked_mul(3600)
        .and_then(|s| i64::try_from(s).ok())
        .unwrap_or(i64::MAX);
    let recommendations: Vec<Recommendation> = ranked
        .into_iter()
        .enumerate()
        .map(|(i, scored)| {
            let freshness = freshness_of(&scored.offer, now, stale_after_secs);
            let id = scored.offer.id.clone();
            Recommendation {
                rank: i + 1,
                pros: pros_of(&scored),
                cons: cons_of(&scored, freshness),
                justification: justifications.get(&id).cloned(),
                tradeoffs: tradeoffs
                    .iter()
                    .filter(|t| t.offers.contains(&id))
                    .map(|t| t.note.clone())
                    .collect(),
                freshness,
                scored,
            }
        })
        .collect();

    let ages: Vec<i64> = recommendations.iter().map(|r| r.freshness.age_secs).collect();
    let mut quality = DataQualityReport {
        sources: crawl.sources,
        deadline_hit: crawl.deadline_hit,
        listings_seen: crawl.listings_seen,
        dropped: crawl.dropped,
        duplicates: crawl.duplicates,
        considered,
        excluded,
        low_completeness: recommendations
            .iter()
            .filter(|r| r.scored.offer.completeness_ratio() < config.low_completeness)
            .map(|r| r.scored.offer.id.clone())
            .collect(),
        stale: recommendations
            .iter()
            .filter(|r| r.freshness.stale)
            .map(|r| r.scored.offer.id.clone())
            .collect(),
        oldest_price_age_secs: ages.iter().copied().max(),
        newest_price_age_secs: ages.iter().copied().min(),
        caveats: Vec::new(),
    };
    quality.caveats = caveats(&quality, &recommendations, &trace.overlay);

    let best_overall = recommendations.first().map(|r| r.scored.offer.id.clone());
    let best_value = best_value(&recommendations);

    let summary_markdown = match (&trace.overlay, summary) {
        (OverlayStatus::Applied, Some(s)) if !s.trim().is_empty() => {
            format!("{}\n\n{}", s.trim(), comparison_table(&recommendations))
        }
        _ => render_summary(
            &intent,
            &recommendations,
            best_overall.as_deref(),
            best_value.as_deref(),
        ),
    };

    tracing::debug!(
        target: "pipeline",
        recommendations = recommendations.len(),
        stale = quality.stale.len(),
        caveats = quality.caveats.len(),
        "assembled recommendation set"
    );

    Ok(RecommendationSet {
        run_id,
        created_at: now,
        intent,
        recommendations,
        best_overall,
        best_value,
        summary_markdown,
        trace,
        quality,
    })
}

pub fn freshness_of(
    offer: &NormalizedOffer,
    now: DateTime<Utc>,
    stale_after_secs: i64,
) -> Freshness {
    let age_secs = (now - offer.price.observed_at).num_seconds().max(0);
    Freshness {
        age_secs,
        stale: age_secs > stale_after_secs,
    }
}

/// Highest price-value sub-score; the cheapest offer when price is not weighted.
fn best_value(recs: &[Recommendation]) -> Option<OfferId> {
    let by_sub = recs
        .iter()
        .filter_map(|r| r.scored.sub_scores.get("price_value").map(|v| (r, *v)))
        .fold(None::<(&Recommendation, f64)>, |acc, (r, v)| match acc {
            Some((_, best)) if best >= v => acc,
            _ => Some((r, v)),
        });
    if let Some((r, _)) = by_sub {
        return Some(r.scored.offer.id.clone());
    }
    let currency = &recs.first()?.scored.offer.price.currency;
    recs.iter()
        .filter(|r| &r.scored.offer.price.currency == currency)
        .min_by(|a, b| a.scored.offer.price.amount.total_cmp(&b.scored.offer.price.amount))
        .map(|r| r.scored.offer.id.clone())
}

fn criterion_label(key: &str) -> String {
    match key {
        "price_value" => "price".into(),
        "rating" => "customer rating".into(),
        "review_volume" => "review volume".into(),
        "delivery_speed" => "delivery speed".into(),
        "brand_trust" => "brand reputation".into(),
        "warranty" => "warranty".into(),
        other => match other.split_once(':') {
            Some(("preferred_brand", b)) => format!("{b} brand match"),
            Some(("more", a)) => format!("more {a}"),
            Some(("less", a)) => format!("lower {a}"),
            Some(("keyword", k)) => format!("'{k}' match"),
            _ => other.to_string(),
        },
    }
}

fn pros_of(s: &ScoredOffer) -> Vec<String> {
    let mut strong: Vec<(&String, f64)> = s
        .sub_scores
        .iter()
        .filter(|(k, v)| **v >= PRO_THRESHOLD && !s.missing_criteria.contains(*k))
        .map(|(k, v)| (k, *v))
        .collect();
    strong.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    strong
        .into_iter()
        .take(MAX_PROS)
        .map(|(k, v)| format!("Strong {} ({v:.2})", criterion_label(k)))
        .collect()
}

fn cons_of(s: &ScoredOffer, freshness: Freshness) -> Vec<String> {
    let mut weak: Vec<(&String, f64)> = s
        .sub_scores
        .iter()
        .filter(|(k, v)| **v <= CON_THRESHOLD && !s.missing_criteria.contains(*k))
        .map(|(k, v)| (k, *v))
        .collect();
    weak.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let mut out: Vec<String> = weak
        .into_iter()
        .take(MAX_CONS)
        .map(|(k, v)| format!("Weak {} ({v:.2})", criterion_label(k)))
        .collect();
    out.extend(
        s.missing_criteria
            .iter()
            .map(|k| format!("No data for {}", criterion_label(k))),
    );
    out.extend(s.unverified.iter().map(|c| format!("Unverified: {c}")));
    if freshness.stale {
        out.push(format!("Price is {}h old", freshness.age_secs / 3600));
    }
    out
}

fn caveats(
    q: &DataQualityReport,
    recs: &[Recommendation],
    overlay: &OverlayStatus,
) -> Vec<String> {
    let mut out = Vec::new();
    if q.deadline_hit {
        out.push("Search deadline reached before every source finished".to_string());
    }
    for s in q.incomplete_sources() {
        let state = match s.state {
            TaskState::TimedOut => "timed out",
            TaskState::Exhausted => "failed after retries",
            _ => "did not finish",
        };
        out.push(format!(
            "Source {} {state} after {} attempt(s)",
            s.source_id, s.attempts
        ));
    }
    for (source, reasons) in &q.dropped {
        let total: usize = reasons.values().sum();
        out.push(format!("{total} listing(s) from {source} could not be read"));
    }
    if !q.stale.is_empty() {
        out.push(format!("{} offer(s) have stale prices", q.stale.len()));
    }
    let unverified = recs.iter().filter(|r| !r.scored.unverified.is_empty()).count();
    if unverified > 0 {
        out.push(format!(
            "{unverified} offer(s) could not be checked against every requirement"
        ));
    }
    if let OverlayStatus::Unavailable { reason } = overlay {
        out.push(format!("Ranking is deterministic only: {reason}"));
    }
    out
}

fn price_text(o: &NormalizedOffer) -> String {
    format!("{:.2} {}", o.price.amount, o.price.currency)
}

fn find<'a>(recs: &'a [Recommendation], id: Option<&str>) -> Option<&'a Recommendation> {
    let id = id?;
    recs.iter().find(|r| r.scored.offer.id == id)
}

fn comparison_table(recs: &[Recommendation]) -> String {
    let mut md = String::from("| # | Offer | Price | Score | Source |\n|---|---|---|---|---|\n");
    for r in recs.iter().take(SUMMARY_TOP) {
        let o = &r.scored.offer;
        let _ = writeln!(
            md,
            "| {} | {} | {} | {:.3} | {} |",
            r.rank,
            o.identity.name.replace('|', "/"),
            price_text(o),
            r.scored.score,
            o.provenance.source_id
        );
    }
    md
}

/// Deterministic markdown: picks, a top-3 table and per-offer reasons.
pub fn render_summary(
    intent: &Intent,
    recs: &[Recommendation],
    best_overall: Option<&str>,
    best_value: Option<&str>,
) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "## Recommendations for \"{}\"\n", intent.raw_text);
    if let Some(r) = find(recs, best_overall) {
        let o = &r.scored.offer;
        let _ = writeln!(
            md,
            "**Best overall:** {} at {} ({})",
            o.identity.name,
            price_text(o),
            o.provenance.source_id
        );
    }
    if let Some(r) = find(recs, best_value) {
        let o = &r.scored.offer;
        let _ = writeln!(
            md,
            "**Best value:** {} at {} ({})",
            o.identity.name,
            price_text(o),
            o.provenance.source_id
        );
    }
    md.push('\n');
    md.push_str(&comparison_table(recs));
    md.push_str("\n### Why\n\n");
    for r in recs.iter().take(SUMMARY_TOP) {
        let reason = match &r.justification {
            Some(j) => j.clone(),
            None if !r.pros.is_empty() => r.pros.join(", "),
            None => "Meets every requirement".to_string(),
        };
        let _ = writeln!(md, "{}. **{}**: {reason}", r.rank, r.scored.offer.identity.name);
        if !r.cons.is_empty() {
            let _ = writeln!(md, "   Watch out: {}", r.cons.join(", "));
        }
    }
    md
}
