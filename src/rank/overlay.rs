//! Reasoning overlay: an advisory, bounded second opinion on the baseline order.
//!
//! The overlay may move an offer by at most `max_rank_shift` positions and attach
//! justifications and trade-off notes. Anything else (timeout, provider failure,
//! a response that is not a bounded permutation) leaves the baseline untouched and
//! is recorded in the trace.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::error::OverlayError;
use crate::intent::Intent;
use crate::offer::OfferId;
use crate::recommendation::{OverlayStatus, ReasoningStep, ScoredOffer, StepOrigin};

/// How many baseline offers are sent to the overlay.
pub const OVERLAY_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayOffer {
    pub id: OfferId,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub score: f64,
    pub sub_scores: BTreeMap<String, f64>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRequest {
    pub intent_summary: String,
    pub residue: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    /// Baseline order, best first.
    pub baseline: Vec<OverlayOffer>,
    pub max_rank_shift: usize,
}

impl OverlayRequest {
    pub fn new(
        intent: &Intent,
        baseline: &[ScoredOffer],
        weights: &BTreeMap<String, f64>,
        max_rank_shift: usize,
    ) -> Self {
        let mut summary = intent.category.clone().unwrap_or_else(|| "product".into());
        if let Some(b) = &intent.budget {
            match (b.min, b.max) {
                (Some(lo), Some(hi)) => summary.push_str(&format!(", {lo}-{hi} {}", b.currency)),
                (None, Some(hi)) => summary.push_str(&format!(", max {hi} {}", b.currency)),
                (Some(lo), None) => summary.push_str(&format!(", min {lo} {}", b.currency)),
                (None, None) => {}
            }
        }
        for c in &intent.constraints {
            summary.push_str(&format!(", {c}"));
        }
        Self {
            intent_summary: summary,
            residue: intent.residue.clone(),
            weights: weights.clone(),
            baseline: baseline
                .iter()
                .take(OVERLAY_WINDOW)
                .map(|s| OverlayOffer {
                    id: s.offer.id.clone(),
                    name: s.offer.identity.name.clone(),
                    price: s.offer.price.amount,
                    currency: s.offer.price.currency.clone(),
                    score: s.score,
                    sub_scores: s.sub_scores.clone(),
                    missing: s.missing_criteria.clone(),
                })
                .collect(),
            max_rank_shift,
        }
    }

    pub fn baseline_ids(&self) -> Vec<OfferId> {
        self.baseline.iter().map(|o| o.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tradeoff {
    pub offers: Vec<OfferId>,
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayResponse {
    /// Proposed order of the request's baseline ids.
    pub order: Vec<OfferId>,
    #[serde(default)]
    pub justifications: BTreeMap<OfferId, String>,
    #[serde(default)]
    pub tradeoffs: Vec<Tradeoff>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[async_trait]
pub trait ReasoningOverlay: Send + Sync {
    fn name(&self) -> &str;

    /// A disabled overlay is never called.
    fn enabled(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        request: &OverlayRequest,
        deadline: Instant,
    ) -> Result<OverlayResponse, OverlayError>;
}

/// Never consulted; the trace records the overlay as disabled.
pub struct DisabledOverlay;

#[async_trait]
impl ReasoningOverlay for DisabledOverlay {
    fn name(&self) -> &str {
        "disabled"
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn evaluate(
        &self,
        _request: &OverlayRequest,
        _deadline: Instant,
    ) -> Result<OverlayResponse, OverlayError> {
        Err(OverlayError::ProviderUnavailable("overlay disabled".into()))
    }
}

/// Deterministic overlay for tests and local runs.
pub enum MockOverlay {
    /// Keeps the baseline order and justifies each position by its score.
    Echo,
    /// Returns the same canned result for every request.
    Fixed(Result<OverlayResponse, OverlayError>),
    /// Sleeps before echoing.
    Delayed(Duration),
}

#[async_trait]
impl ReasoningOverlay for MockOverlay {
    fn name(&self) -> &str {
        "mock"
    }

    async fn evaluate(
        &self,
        request: &OverlayRequest,
        _deadline: Instant,
    ) -> Result<OverlayResponse, OverlayError> {
        match self {
            MockOverlay::Echo => Ok(echo(request)),
            MockOverlay::Fixed(r) => r.clone(),
            MockOverlay::Delayed(d) => {
                tokio::time::sleep(*d).await;
                Ok(echo(request))
            }
        }
    }
}

fn echo(request: &OverlayRequest) -> OverlayResponse {
    OverlayResponse {
        order: request.baseline_ids(),
        justifications: request
            .baseline
            .iter()
            .map(|o| (o.id.clone(), format!("Deterministic score {:.3}", o.score)))
            .collect(),
        tradeoffs: Vec::new(),
        summary: None,
    }
}

/// The order must be a permutation of `baseline` with every move within `max_shift`.
pub fn validate_order(
    baseline: &[OfferId],
    proposed: &[OfferId],
    max_shift: usize,
) -> Result<(), OverlayError> {
    if proposed.len() != baseline.len() {
        return Err(OverlayError::MalformedResponse(format!(
            "order has {} ids, baseline has {}",
            proposed.len(),
            baseline.len()
        )));
    }
    let positions: HashMap<&str, usize> = baseline
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let mut seen = vec![false; baseline.len()];
    for (new_pos, id) in proposed.iter().enumerate() {
        let Some(&old_pos) = positions.get(id.as_str()) else {
            return Err(OverlayError::MalformedResponse(format!("unknown offer id {id}")));
        };
        if std::mem::replace(&mut seen[old_pos], true) {
            return Err(OverlayError::MalformedResponse(format!("duplicate offer id {id}")));
        }
        if old_pos.abs_diff(new_pos) > max_shift {
            return Err(OverlayError::MalformedResponse(format!(
                "{id} moved {} positions (max {max_shift})",
                old_pos.abs_diff(new_pos)
            )));
        }
    }
    Ok(())
}

/// Result of the single overlay pass of a run.
#[derive(Debug, Clone)]
pub struct OverlayPass {
    pub ranked: Vec<ScoredOffer>,
    pub status: OverlayStatus,
    pub steps: Vec<ReasoningStep>,
    pub justifications: BTreeMap<OfferId, String>,
    pub tradeoffs: Vec<Tradeoff>,
    pub summary: Option<String>,
}

/// Call the overlay once and apply its order when it validates.
/// `deadline` is the request budget; the call gets `timeout` within it.
pub async fn apply_overlay(
    overlay: &dyn ReasoningOverlay,
    request: OverlayRequest,
    baseline: Vec<ScoredOffer>,
    timeout: Duration,
    deadline: Instant,
) -> OverlayPass {
    crate::metrics::ensure_described();
    let unchanged = |status: OverlayStatus, steps: Vec<ReasoningStep>, baseline: Vec<ScoredOffer>| {
        OverlayPass {
            ranked: baseline,
            status,
            steps,
            justifications: BTreeMap::new(),
            tradeoffs: Vec::new(),
            summary: None,
        }
    };

    if !overlay.enabled() {
        counter!("overlay_calls_total", "outcome" => "disabled").increment(1);
        return unchanged(OverlayStatus::Disabled, Vec::new(), baseline);
    }
    if request.baseline.is_empty() {
        return unchanged(
            OverlayStatus::Unavailable {
                reason: "no offers to reason about".into(),
            },
            Vec::new(),
            baseline,
        );
    }

    let call_deadline = deadline.min(Instant::now() + timeout);
    let result = timeout_at(call_deadline, overlay.evaluate(&request, call_deadline))
        .await
        .unwrap_or(Err(OverlayError::Timeout));

    let response = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "overlay", provider = overlay.name(), error = %e, "overlay unavailable, keeping baseline");
            counter!("overlay_calls_total", "outcome" => outcome_label(&e)).increment(1);
            return unchanged(
                OverlayStatus::Unavailable {
                    reason: e.to_string(),
                },
                Vec::new(),
                baseline,
            );
        }
    };

    let window = request.baseline_ids();
    if let Err(e) = validate_order(&window, &response.order, request.max_rank_shift) {
        tracing::warn!(target: "overlay", provider = overlay.name(), error = %e, "overlay order rejected, keeping baseline");
        counter!("overlay_calls_total", "outcome" => "malformed").increment(1);
        let steps = overlay_steps(&response, &window, true);
        return unchanged(
            OverlayStatus::Unavailable {
                reason: e.to_string(),
            },
            steps,
            baseline,
        );
    }

    counter!("overlay_calls_total", "outcome" => "applied").increment(1);
    let steps = overlay_steps(&response, &window, false);
    let mut rest = baseline;
    let tail = rest.split_off(window.len().min(rest.len()));
    let mut by_id: HashMap<OfferId, ScoredOffer> =
        rest.into_iter().map(|s| (s.offer.id.clone(), s)).collect();
    let mut ranked: Vec<ScoredOffer> = response
        .order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect();
    ranked.extend(tail);

    tracing::info!(target: "overlay", provider = overlay.name(), moved = moved_count(&window, &response.order), "overlay applied");
    OverlayPass {
        ranked,
        status: OverlayStatus::Applied,
        steps,
        justifications: response.justifications,
        tradeoffs: response.tradeoffs,
        summary: response.summary,
    }
}

fn outcome_label(e: &OverlayError) -> &'static str {
    match e {
        OverlayError::Timeout => "timeout",
        OverlayError::MalformedResponse(_) => "malformed",
        OverlayError::ProviderUnavailable(_) => "unavailable",
    }
}

fn moved_count(baseline: &[OfferId], order: &[OfferId]) -> usize {
    baseline.iter().zip(order).filter(|(a, b)| a != b).count()
}

fn overlay_steps(resp: &OverlayResponse, window: &[OfferId], discarded: bool) -> Vec<ReasoningStep> {
    let mut steps = Vec::new();
    for (new_pos, id) in resp.order.iter().enumerate() {
        let Some(old_pos) = window.iter().position(|w| w == id) else {
            continue;
        };
        if old_pos == new_pos && !resp.justifications.contains_key(id) {
            continue;
        }
        let verdict = match new_pos.cmp(&old_pos) {
            std::cmp::Ordering::Less => format!("moved up {} to #{}", old_pos - new_pos, new_pos + 1),
            std::cmp::Ordering::Greater => format!("moved down {} to #{}", new_pos - old_pos, new_pos + 1),
            std::cmp::Ordering::Equal => format!("kept at #{}", new_pos + 1),
        };
        steps.push(ReasoningStep {
            criterion: "overlay_rank".into(),
            offers: vec![id.clone()],
            verdict,
            justification: resp.justifications.get(id).cloned().unwrap_or_default(),
            origin: StepOrigin::Overlay,
            discarded,
        });
    }
    for t in &resp.tradeoffs {
        steps.push(ReasoningStep {
            criterion: "tradeoff".into(),
            offers: t.offers.clone(),
            verdict: "trade-off".into(),
            justification: t.note.clone(),
            origin: StepOrigin::Overlay,
            discarded,
        });
    }
    steps
}

/// Pull an [`OverlayResponse`] out of model text: plain JSON, a fenced code
/// block, or the first `{...}` object in the text.
pub fn parse_overlay_text(text: &str) -> Result<OverlayResponse, OverlayError> {
    let trimmed = text.trim();
    if let Ok(r) = serde_json::from_str::<OverlayResponse>(trimmed) {
        return Ok(r);
    }
    if let Some(block) = fenced_block(trimmed) {
        if let Ok(r) = serde_json::from_str::<OverlayResponse>(block) {
            return Ok(r);
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(r) = serde_json::from_str::<OverlayResponse>(&trimmed[start..=end]) {
                return Ok(r);
            }
        }
    }
    Err(OverlayError::MalformedResponse(
        "no JSON object with an `order` field".into(),
    ))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::parse_intent;
    use crate::testing::offer;

    fn ids(v: &[&str]) -> Vec<OfferId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn scored(names: &[&str]) -> Vec<ScoredOffer> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ScoredOffer {
                offer: offer("a", n, 500.0 + i as f64).build(),
                score: 1.0 - i as f64 * 0.1,
                sub_scores: BTreeMap::new(),
                unverified: vec![],
                missing_criteria: vec![],
            })
            .collect()
    }

    fn request(baseline: &[ScoredOffer]) -> OverlayRequest {
        let intent = parse_intent("laptop under $900").unwrap();
        OverlayRequest::new(&intent, baseline, &BTreeMap::new(), 2)
    }

    #[test]
    fn validation_rejects_far_moves_and_non_permutations() {
        let base = ids(&["a", "b", "c", "d"]);
        assert!(validate_order(&base, &ids(&["b", "a", "c", "d"]), 2).is_ok());
        assert!(validate_order(&base, &ids(&["d", "a", "b", "c"]), 2).is_err());
        assert!(validate_order(&base, &ids(&["a", "b", "c"]), 2).is_err());
        assert!(validate_order(&base, &ids(&["a", "a", "c", "d"]), 2).is_err());
        assert!(validate_order(&base, &ids(&["a", "b", "c", "x"]), 2).is_err());
    }

    #[test]
    fn tolerant_parsing() {
        let plain = r#"{"order": ["x", "y"]}"#;
        assert_eq!(parse_overlay_text(plain).unwrap().order, ids(&["x", "y"]));

        let fenced = "Here you go:\n```json\n{\"order\": [\"y\", \"x\"], \"summary\": \"ok\"}\n```\n";
        let r = parse_overlay_text(fenced).unwrap();
        assert_eq!(r.order, ids(&["y", "x"]));
        assert_eq!(r.summary.as_deref(), Some("ok"));

        let chatty = "Sure! {\"order\": [\"x\"]} hope that helps";
        assert_eq!(parse_overlay_text(chatty).unwrap().order, ids(&["x"]));

        assert!(parse_overlay_text("I cannot help with that").is_err());
    }

    #[tokio::test]
    async fn valid_swap_is_applied() {
        let base = scored(&["one", "two", "three"]);
        let req = request(&base);
        let id0 = base[0].offer.id.clone();
        let id1 = base[1].offer.id.clone();
        let id2 = base[2].offer.id.clone();
        let mut justifications = BTreeMap::new();
        justifications.insert(id1.clone(), "better keyboard for the money".to_string());
        let overlay = MockOverlay::Fixed(Ok(OverlayResponse {
            order: vec![id1.clone(), id0.clone(), id2.clone()],
            justifications,
            tradeoffs: vec![],
            summary: Some("two edges out one".into()),
        }));
        let pass = apply_overlay(
            &overlay,
            req,
            base,
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(5),
        )
        .await;
        assert_eq!(pass.status, OverlayStatus::Applied);
        assert_eq!(pass.ranked[0].offer.id, id1);
        assert_eq!(pass.ranked[1].offer.id, id0);
        assert!(pass.steps.iter().all(|s| !s.discarded));
        assert_eq!(pass.summary.as_deref(), Some("two edges out one"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_baseline_exactly() {
        let base = scored(&["one", "two", "three"]);
        let before: Vec<_> = base.iter().map(|s| s.offer.id.clone()).collect();
        let pass = apply_overlay(
            &MockOverlay::Delayed(Duration::from_secs(10)),
            request(&base),
            base,
            Duration::from_millis(200),
            Instant::now() + Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            pass.status,
            OverlayStatus::Unavailable {
                reason: OverlayError::Timeout.to_string()
            }
        );
        let after: Vec<_> = pass.ranked.iter().map(|s| s.offer.id.clone()).collect();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn out_of_bounds_move_is_discarded_but_traced() {
        let base = scored(&["one", "two", "three", "four"]);
        let before: Vec<_> = base.iter().map(|s| s.offer.id.clone()).collect();
        let mut order = before.clone();
        order.rotate_right(1); // last offer jumps three places
        let overlay = MockOverlay::Fixed(Ok(OverlayResponse {
            order,
            ..OverlayResponse::default()
        }));
        let pass = apply_overlay(
            &overlay,
            request(&base),
            base,
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(5),
        )
        .await;
        assert!(matches!(pass.status, OverlayStatus::Unavailable { .. }));
        let after: Vec<_> = pass.ranked.iter().map(|s| s.offer.id.clone()).collect();
        assert_eq!(after, before);
        assert!(!pass.steps.is_empty());
        assert!(pass.steps.iter().all(|s| s.discarded));
    }

    #[tokio::test]
    async fn disabled_overlay_is_not_called() {
        let base = scored(&["one"]);
        let pass = apply_overlay(
            &DisabledOverlay,
            request(&base),
            base,
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(5),
        )
        .await;
        assert_eq!(pass.status, OverlayStatus::Disabled);
    }
}
