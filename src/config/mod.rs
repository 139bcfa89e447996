pub mod overlay;
pub mod pipeline;

pub use overlay::OverlayConfig;
pub use pipeline::{ConstraintPolicy, CrawlConfig, PipelineConfig, RankingConfig, SourceConfig};
