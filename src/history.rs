//! history.rs — in-memory record of recent pipeline runs.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::Intent;
use crate::recommendation::{DataGrade, RankingGrade, RecommendationSet};

/// Persistence collaborator: the pipeline hands every successful run to it.
pub trait RecommendationStore: Send + Sync {
    fn save(&self, intent: &Intent, set: &RecommendationSet);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub category: Option<String>,
    pub data_grade: DataGrade,
    pub ranking_grade: RankingGrade,
    pub offers: usize,
    // short fingerprint of the top of the list for quick diagnosis
    pub top_offers: Vec<String>,
    pub best_value: Option<String>,
}

#[derive(Debug)]
pub struct History {
    inner: Mutex<Vec<HistoryEntry>>,
    cap: usize,
}

impl History {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.clamp(1, 10_000),
        }
    }

    pub fn push(&self, intent: &Intent, set: &RecommendationSet) {
        let grade = set.grade();
        let entry = HistoryEntry {
            run_id: set.run_id.clone(),
            created_at: set.created_at,
            category: intent.category.clone(),
            data_grade: grade.data,
            ranking_grade: grade.ranking,
            offers: set.recommendations.len(),
            top_offers: set
                .recommendations
                .iter()
                .take(3)
                .map(|r| r.scored.offer.identity.name.clone())
                .collect(),
            best_value: set.best_value.clone(),
        };

        let Ok(mut v) = self.inner.lock() else {
            tracing::warn!(target: "pipeline", "history mutex poisoned, run not recorded");
            return;
        };
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<HistoryEntry> {
        let Ok(v) = self.inner.lock() else {
            return Vec::new();
        };
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecommendationStore for History {
    fn save(&self, intent: &Intent, set: &RecommendationSet) {
        self.push(intent, set);
    }
}
