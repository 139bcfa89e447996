//! Ranking & reasoning engine.
//!
//! Two passes: a deterministic filter-and-score baseline ([`scoring`]), then at
//! most one bounded overlay call ([`overlay`]). The trace records both.

pub mod brand_trust;
pub mod llm;
pub mod overlay;
pub mod scoring;

use std::collections::BTreeMap;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;

use crate::config::RankingConfig;
use crate::intent::{Criterion, Intent};
use crate::offer::{NormalizedOffer, OfferId};
use crate::recommendation::{Exclusion, ReasoningStep, ReasoningTrace, ScoredOffer, StepOrigin};

pub use brand_trust::BrandTrustTable;
pub use llm::build_overlay;
pub use overlay::{
    DisabledOverlay, MockOverlay, OverlayRequest, OverlayResponse, ReasoningOverlay, Tradeoff,
};

/// Output of the deterministic pass.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub ranked: Vec<ScoredOffer>,
    pub excluded: Vec<Exclusion>,
    pub weights: BTreeMap<String, f64>,
    pub steps: Vec<ReasoningStep>,
    /// Offers that went into filtering.
    pub considered: usize,
}

/// Final ranking after the overlay pass.
#[derive(Debug, Clone)]
pub struct Ranking {
    pub ranked: Vec<ScoredOffer>,
    pub excluded: Vec<Exclusion>,
    pub considered: usize,
    pub trace: ReasoningTrace,
    pub justifications: BTreeMap<OfferId, String>,
    pub tradeoffs: Vec<Tradeoff>,
    pub summary: Option<String>,
}

pub struct RankingEngine {
    config: RankingConfig,
    trust: BrandTrustTable,
}

impl RankingEngine {
    pub fn new(config: RankingConfig, trust: BrandTrustTable) -> Self {
        Self { config, trust }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Filter hard-constraint violators and score the rest.
    pub fn baseline(&self, intent: &Intent, offers: Vec<NormalizedOffer>) -> Baseline {
        crate::metrics::ensure_described();
        let considered = offers.len();
        let (eligible, excluded) =
            scoring::filter_eligible(intent, offers, self.config.constraint_policy);
        if !excluded.is_empty() {
            counter!("rank_offers_excluded_total").increment(excluded.len() as u64);
        }

        let weights = scoring::effective_weights(&self.config.weights, intent);
        let ranked = scoring::score_offers(eligible, &weights, &self.trust);
        let steps = deterministic_steps(&ranked, &excluded, &weights);

        tracing::info!(
            target: "rank",
            considered,
            eligible = ranked.len(),
            excluded = excluded.len(),
            criteria = weights.len(),
            "baseline ranked"
        );

        Baseline {
            ranked,
            excluded,
            weights: weights
                .into_iter()
                .map(|(c, w)| (c.to_string(), w))
                .collect(),
            steps,
            considered,
        }
    }

    /// Baseline plus one overlay call bounded by `overlay_timeout` and `deadline`.
    pub async fn rank(
        &self,
        intent: &Intent,
        offers: Vec<NormalizedOffer>,
        overlay: &dyn ReasoningOverlay,
        overlay_timeout: Duration,
        deadline: Instant,
    ) -> Ranking {
        let Baseline {
            ranked,
            excluded,
            weights,
            mut steps,
            considered,
        } = self.baseline(intent, offers);

        let baseline_order: Vec<OfferId> = ranked.iter().map(|s| s.offer.id.clone()).collect();
        let request = OverlayRequest::new(intent, &ranked, &weights, self.config.max_rank_shift);
        let pass =
            overlay::apply_overlay(overlay, request, ranked, overlay_timeout, deadline).await;
        steps.extend(pass.steps);

        let overlay_provider = overlay.enabled().then(|| overlay.name().to_string());
        Ranking {
            ranked: pass.ranked,
            excluded,
            considered,
            trace: ReasoningTrace {
                weights,
                steps,
                overlay: pass.status,
                overlay_provider,
                baseline_order,
            },
            justifications: pass.justifications,
            tradeoffs: pass.tradeoffs,
            summary: pass.summary,
        }
    }
}

/// One step per hard-constraint outcome and per weighted criterion.
fn deterministic_steps(
    ranked: &[ScoredOffer],
    excluded: &[Exclusion],
    weights: &BTreeMap<Criterion, f64>,
) -> Vec<ReasoningStep> {
    let mut steps = Vec::new();

    for ex in excluded {
        let mut reasons = ex.violated.clone();
        reasons.extend(ex.unknown.iter().map(|u| format!("{u} (unverified)")));
        steps.push(ReasoningStep {
            criterion: "constraints".into(),
            offers: vec![ex.offer_id.clone()],
            verdict: "excluded".into(),
            justification: reasons.join("; "),
            origin: StepOrigin::Deterministic,
            discarded: false,
        });
    }

    for (c, w) in weights {
        let key = c.to_string();
        let best = ranked
            .iter()
            .filter(|s| !s.missing_criteria.contains(&key))
            .filter_map(|s| s.sub_scores.get(&key).map(|v| (s, *v)))
            .fold(None::<(&ScoredOffer, f64)>, |acc, (s, v)| match acc {
                Some((_, bv)) if bv >= v => acc,
                _ => Some((s, v)),
            });
        let missing = ranked
            .iter()
            .filter(|s| s.missing_criteria.contains(&key))
            .count();
        let (offers, verdict) = match best {
            Some((s, v)) => (vec![s.offer.id.clone()], format!("leader scores {v:.2}")),
            None => (Vec::new(), "no offer has data".to_string()),
        };
        let mut justification = format!("weight {w:.3}");
        if missing > 0 {
            justification.push_str(&format!(", {missing} offer(s) lack data and score 0"));
        }
        steps.push(ReasoningStep {
            criterion: key,
            offers,
            verdict,
            justification,
            origin: StepOrigin::Deterministic,
            discarded: false,
        });
    }
    steps
}
