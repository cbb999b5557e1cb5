// src/main.rs
//
// Live detection/tracking engine. Reads frames from a camera or video
// file, detects and tracks vehicles, inspects riders for helmets on a
// time gate, and emits violation artifacts into the handoff directory
// consumed by the image_pipeline binary.

use anyhow::{Context, Result};
use helmet_detection::config::Config;
use helmet_detection::stream::{StreamControls, StreamOrchestrator};
use helmet_detection::video_source::VideoSource;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load("config.yaml")?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("helmet_detection={},ort=warn", config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🛵 Helmet Violation Detection System Starting");
    info!(
        "Detection: conf={:.2}, interval={} frames | Violation: confirm={}, cooldown={} frames",
        config.detection.confidence_threshold,
        config.detection.detection_interval_frames,
        config.violation.confirm_threshold,
        config.violation.cooldown_frames,
    );

    let source = match config.video.source_type.as_str() {
        "camera" => {
            let index: i32 = config
                .video
                .source
                .parse()
                .with_context(|| format!("Invalid camera index '{}'", config.video.source))?;
            VideoSource::open_camera(index)?
        }
        "video" => VideoSource::open_file(&config.video.source)?,
        other => anyhow::bail!("Unknown source_type '{}' (use \"camera\" or \"video\")", other),
    };
    let source = Arc::new(source);
    info!("✓ Video source ready");

    let controls = Arc::new(StreamControls::new(&config));

    // Shutdown path: stop the loop and release the capture. The
    // orchestrator's own exit releases it too; the guard makes the
    // double release a no-op.
    {
        let controls = Arc::clone(&controls);
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Interrupt received, stopping stream");
                controls.stop();
                source.stop();
            }
        });
    }

    let mut orchestrator = StreamOrchestrator::new(config, Arc::clone(&source), controls)?;
    let summary = tokio::task::spawn_blocking(move || orchestrator.run())
        .await
        .context("Stream loop panicked")??;

    info!("\n📊 Final Report:");
    info!("  Total frames: {}", summary.total_frames);
    info!("  Detection runs: {}", summary.detection_runs);
    info!("  Vehicles detected: {}", summary.vehicles_detected);
    info!("  Tracks created: {}", summary.tracks_created);
    info!("  Inspections: {}", summary.inspections);
    info!("  Violations confirmed: {}", summary.violations_confirmed);
    info!("  Artifacts emitted: {}", summary.artifacts_emitted);
    if summary.inspection_errors > 0 || summary.frames_skipped > 0 {
        warn!(
            "  Degraded frames: {} skipped, {} inspection errors",
            summary.frames_skipped, summary.inspection_errors
        );
    }
    info!("  Processing speed: {:.1} FPS", summary.fps);

    Ok(())
}
