// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod assemble;
pub mod config;
pub mod crawl;
pub mod error;
pub mod history;
pub mod intent;
pub mod metrics;
pub mod normalize;
pub mod offer;
pub mod pipeline;
pub mod rank;
pub mod recommendation;
pub mod sources;
pub mod units;

#[cfg(test)]
mod testing;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::PipelineConfig;
pub use crate::error::PipelineError;
pub use crate::history::{History, RecommendationStore};
pub use crate::intent::{parse_intent, Intent};
pub use crate::pipeline::Pipeline;
pub use crate::recommendation::RecommendationSet;

use std::sync::Arc;

/// Pipeline + history wired together from config, ready for [`create_router`].
pub fn build_state(cfg: &PipelineConfig) -> anyhow::Result<AppState> {
    let history = Arc::new(History::with_capacity(cfg.history_capacity));
    let pipeline = Pipeline::from_config(cfg)?.with_store(history.clone());
    Ok(AppState::new(Arc::new(pipeline), history))
}
