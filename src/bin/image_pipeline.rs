// src/bin/image_pipeline.rs
//
// Enrichment pipeline process. Runs separately from the live engine and
// communicates with it only through the violation handoff directory.

use anyhow::Result;
use helmet_detection::config::Config;
use helmet_detection::pipeline::runner::ImagePipeline;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load("config.yaml")?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("helmet_detection={},image_pipeline={}", config.logging.level, config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pipeline = ImagePipeline::new(config)?;
    let ctx = pipeline.context();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Interrupt received, draining workers");
            let _ = shutdown_tx.send(true);
        }
    });

    pipeline.run(shutdown_rx).await?;

    info!("Unique plates this run: {}", ctx.unique_plate_count());
    info!("👋 Pipeline stopped");
    Ok(())
}
