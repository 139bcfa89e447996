//! Output model: what one pipeline run hands back to its caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionFailure;
use crate::intent::Intent;
use crate::offer::{NormalizedOffer, OfferId};

pub use crate::crawl::task::{SourceReport, TaskState};

/// A constraint-satisfying offer with its deterministic score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOffer {
    pub offer: NormalizedOffer,
    /// Weighted sum of `sub_scores`, in [0, 1].
    pub score: f64,
    /// Criterion → sub-score in [0, 1].
    pub sub_scores: BTreeMap<String, f64>,
    /// Hard constraints that could not be checked because the attribute is absent.
    pub unverified: Vec<String>,
    /// Criteria that scored 0 because the offer lacks the data.
    pub missing_criteria: Vec<String>,
}

impl ScoredOffer {
    pub fn id(&self) -> &str {
        &self.offer.id
    }
}

/// An offer dropped by a hard constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub offer_id: OfferId,
    pub name: String,
    pub source_id: String,
    pub violated: Vec<String>,
    /// Constraints that could not be verified (only excluding under the strict policy).
    pub unknown: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOrigin {
    Deterministic,
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub criterion: String,
    pub offers: Vec<OfferId>,
    pub verdict: String,
    pub justification: String,
    pub origin: StepOrigin,
    /// Overlay output that was rejected and did not affect the ranking.
    #[serde(default)]
    pub discarded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverlayStatus {
    Applied,
    Unavailable { reason: String },
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// Effective, renormalized criterion weights.
    pub weights: BTreeMap<String, f64>,
    pub steps: Vec<ReasoningStep>,
    pub overlay: OverlayStatus,
    pub overlay_provider: Option<String>,
    /// Deterministic order before the overlay ran.
    pub baseline_order: Vec<OfferId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    /// Age of the price at assembly time.
    pub age_secs: i64,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 1-based.
    pub rank: usize,
    pub scored: ScoredOffer,
    pub freshness: Freshness,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    /// Overlay justification for this offer's position, when applied.
    pub justification: Option<String>,
    pub tradeoffs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub sources: Vec<SourceReport>,
    pub deadline_hit: bool,
    pub listings_seen: usize,
    pub dropped: BTreeMap<String, BTreeMap<ExtractionFailure, usize>>,
    pub duplicates: BTreeMap<String, usize>,
    pub considered: usize,
    pub excluded: Vec<Exclusion>,
    pub low_completeness: Vec<OfferId>,
    pub stale: Vec<OfferId>,
    pub oldest_price_age_secs: Option<i64>,
    pub newest_price_age_secs: Option<i64>,
    pub caveats: Vec<String>,
}

impl DataQualityReport {
    pub fn incomplete_sources(&self) -> Vec<&SourceReport> {
        self.sources.iter().filter(|s| s.is_incomplete()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataGrade {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingGrade {
    Reasoned,
    DeterministicOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub data: DataGrade,
    pub ranking: RankingGrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub intent: Intent,
    pub recommendations: Vec<Recommendation>,
    pub best_overall: Option<OfferId>,
    pub best_value: Option<OfferId>,
    pub summary_markdown: String,
    pub trace: ReasoningTrace,
    pub quality: DataQualityReport,
}

impl RecommendationSet {
    pub fn grade(&self) -> Grade {
        let q = &self.quality;
        let full = !q.deadline_hit
            && q.incomplete_sources().is_empty()
            && q.dropped.is_empty()
            && q.stale.is_empty();
        Grade {
            data: if full { DataGrade::Full } else { DataGrade::Partial },
            ranking: match self.trace.overlay {
                OverlayStatus::Applied => RankingGrade::Reasoned,
                _ => RankingGrade::DeterministicOnly,
            },
        }
    }

    pub fn offer_ids(&self) -> Vec<&str> {
        self.recommendations.iter().map(|r| r.scored.id()).collect()
    }
}
