//! Binary entry point for running stress tests
//! Run with: cargo run --bin stress_test

use anyhow::{anyhow, Result};
use forecast_engine::config::Config;
use forecast_engine::stress::{self, StressConfig};
use tracing::info;

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info,forecast_engine=debug")
        .init();

    info!("🚀 Forecast Scoring Engine Stress Test");
    info!("=====================================");

    // Load configuration
    let config = Config::from_env();
    let stress_config = StressConfig::from_env();
    info!("Configuration loaded:");
    info!("  - Score resolution: {}", config.scoring.score_resolution);
    info!("  - Questions: {}", stress_config.num_questions);
    info!("  - Max forecasters per question: {}", stress_config.max_forecasters);

    let report = stress::run_stress_test(&config, &stress_config)?;

    if !report.violations.is_empty() {
        return Err(anyhow!("{} invariant violations", report.violations.len()));
    }

    info!("✅ Stress test completed successfully!");
    Ok(())
}
