// src/sources/types.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::pacer::Pacer;
use crate::error::SourceError;
use crate::intent::Intent;

/// Which field mapping the normalizer applies to a listing's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSchema {
    /// Flattened `<item>` of an RSS-style product feed.
    MerchantFeed,
    /// One object from a JSON search API response.
    JsonCatalog,
}

/// Semi-parsed candidate product as one adapter saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub source_id: String,
    pub schema: ListingSchema,
    /// Field name → value, exactly as the source delivered it.
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    /// Currency the source quotes in when a price string carries none.
    pub currency_hint: Option<String>,
}

/// Per-source limits handed to an adapter for one attempt.
#[derive(Clone)]
pub struct FetchLimits {
    pub max_listings: usize,
    /// How many of the intent's search queries an adapter may issue.
    pub max_queries: usize,
    /// Every outbound request goes through this (concurrency + politeness).
    pub pacer: Arc<Pacer>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;
    fn schema(&self) -> ListingSchema;
    async fn fetch(
        &self,
        intent: &Intent,
        limits: &FetchLimits,
        deadline: Instant,
    ) -> Result<Vec<RawListing>, SourceError>;
}
