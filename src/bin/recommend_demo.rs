//! Runs the pipeline once against the configured (fixture) sources and prints the result as JSON.
//!
//! Usage: `cargo run --bin recommend_demo -- "laptop under $900 with at least 16GB RAM"`

use anyhow::Context;
use buysmart_pipeline::{Pipeline, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(true).compact().init();

    let query = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let query = if query.trim().is_empty() {
        "laptop under $900 with at least 16GB RAM".to_string()
    } else {
        query
    };

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let pipeline = Pipeline::from_config(&cfg)?;

    match pipeline.recommend(&query).await {
        Ok(set) => {
            println!("{}", serde_json::to_string_pretty(&set)?);
            eprintln!("\n{}", set.summary_markdown);
        }
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            std::process::exit(1);
        }
    }
    Ok(())
}
