//! Error taxonomy of the pipeline.
//!
//! Only [`PipelineError`] ever reaches a caller. Source, extraction and overlay
//! failures are absorbed by their stage and surface as data-quality annotations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recommendation::SourceReport;

/// Fatal outcomes of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or non-purchasing input. Never retried.
    #[error("invalid intent: {reason}")]
    InvalidIntent { reason: String },

    /// Every source ended without a single listing.
    #[error("no data available from {} source(s)", sources.len())]
    NoDataAvailable { sources: Vec<SourceReport> },

    /// Listings were found, but none survived hard-constraint filtering.
    #[error("no eligible offers: {excluded} of {considered} offers excluded by hard constraints")]
    NoEligibleOffers { considered: usize, excluded: usize },
}

impl PipelineError {
    pub fn invalid_intent(reason: impl Into<String>) -> Self {
        Self::InvalidIntent {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, used by the HTTP layer and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIntent { .. } => "invalid_intent",
            Self::NoDataAvailable { .. } => "no_data_available",
            Self::NoEligibleOffers { .. } => "no_eligible_offers",
        }
    }
}

/// Failure of one fetch attempt against one catalog source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source timed out")]
    Timeout,

    #[error("source rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("source unavailable: {reason}")]
    Unavailable { reason: String },
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Why a raw listing was dropped by the normalizer.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("listing has no price")]
    MissingPrice,

    #[error("listing price could not be parsed or is not positive")]
    InvalidPrice,

    #[error("listing has no product identity")]
    MissingIdentity,

    #[error("listing payload is not an object")]
    MalformedPayload,
}

/// Advisory failure of the reasoning overlay; always falls back to the baseline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error("reasoning overlay timed out")]
    Timeout,

    #[error("reasoning overlay returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("reasoning overlay provider unavailable: {0}")]
    ProviderUnavailable(String),
}
