// src/pipeline/runner.rs
//
// Enrichment pipeline driver: polling loop, bounded worker pool,
// graceful drain. Workers share the explicitly-owned PipelineContext;
// a failed artifact is logged and abandoned -- its file has already
// been claimed, and the poll loop keeps running regardless.

use crate::config::Config;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::enhance;
use crate::pipeline::plate_reader::PlateReader;
use crate::pipeline::publisher::{PersistencePublisher, ViolationRecord};
use crate::pipeline::validator;
use crate::pipeline::watcher::{ArtifactRef, ArtifactWatcher};
use anyhow::{Context as _, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Per-artifact processing result, written alongside the processed
/// image so the outcome survives the process.
#[derive(Debug, Serialize)]
struct ArtifactResult {
    original_file: String,
    enhanced_file: String,
    vehicle_id: u32,
    resolution: String,
    confidence: f32,
    plate_text: String,
    normalized_plate: String,
    backend: String,
    image_url: String,
    processed_at: String,
}

pub struct ImagePipeline {
    config: Config,
    ctx: Arc<PipelineContext>,
    watcher: Arc<ArtifactWatcher>,
    reader: Arc<PlateReader>,
    publisher: Arc<PersistencePublisher>,
}

impl ImagePipeline {
    pub fn new(config: Config) -> Result<Self> {
        let watcher = Arc::new(ArtifactWatcher::new(&config.pipeline)?);
        let reader = Arc::new(PlateReader::new(&config.recognition)?);
        let publisher = Arc::new(PersistencePublisher::new(config.publisher.clone())?);

        fs::create_dir_all(&config.pipeline.enhanced_dir)
            .with_context(|| format!("Failed to create {}", config.pipeline.enhanced_dir))?;
        fs::create_dir_all(&config.pipeline.results_dir)
            .with_context(|| format!("Failed to create {}", config.pipeline.results_dir))?;

        Ok(Self {
            config,
            ctx: Arc::new(PipelineContext::new()),
            watcher,
            reader,
            publisher,
        })
    }

    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.ctx)
    }

    /// Run until shutdown is signalled. In-flight workers finish their
    /// current artifact before the pipeline exits.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("🚀 Image pipeline starting");
        info!("  watching: {}", self.config.pipeline.watch_dir);
        info!("  workers:  {}", self.config.pipeline.worker_count);

        let (tx, mut rx) = mpsc::channel::<ArtifactRef>(64);
        let watcher = Arc::clone(&self.watcher);
        let watcher_ctx = Arc::clone(&self.ctx);
        let watcher_shutdown = shutdown.clone();
        let watcher_task =
            tokio::spawn(async move { watcher.run(watcher_ctx, tx, watcher_shutdown).await });

        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.worker_count.max(1)));
        let mut workers = JoinSet::new();
        let mut shutdown_rx = shutdown.clone();

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(artifact) => {
                            // Reap finished workers so the set stays small
                            while workers.try_join_next().is_some() {}

                            let permit = Arc::clone(&semaphore)
                                .acquire_owned()
                                .await
                                .context("Worker semaphore closed")?;
                            let ctx = Arc::clone(&self.ctx);
                            let watcher = Arc::clone(&self.watcher);
                            let reader = Arc::clone(&self.reader);
                            let publisher = Arc::clone(&self.publisher);
                            let config = self.config.clone();
                            workers.spawn(async move {
                                process_artifact(ctx, watcher, reader, publisher, config, artifact)
                                    .await;
                                drop(permit);
                            });
                        }
                        None => break,
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Graceful drain: no new artifacts, but current ones complete.
        drop(rx);
        if !workers.is_empty() {
            info!("Draining {} in-flight worker(s)", workers.len());
        }
        while workers.join_next().await.is_some() {}
        let _ = watcher_task.await;

        let summary = self.ctx.metrics.summary();
        info!(
            "Pipeline stopped: {} claimed, {} published, {} duplicates, {} failed, {} unique plates",
            summary.artifacts_claimed,
            summary.publish_successes,
            summary.plates_duplicate,
            summary.artifacts_failed,
            self.ctx.unique_plate_count(),
        );
        Ok(())
    }
}

async fn process_artifact(
    ctx: Arc<PipelineContext>,
    watcher: Arc<ArtifactWatcher>,
    reader: Arc<PlateReader>,
    publisher: Arc<PersistencePublisher>,
    config: Config,
    artifact: ArtifactRef,
) {
    let metrics = &ctx.metrics;

    let claimed_path = match watcher.claim(&ctx, &artifact) {
        Some(path) => path,
        None => return,
    };
    info!("🔄 Processing {}", artifact.filename);

    if artifact.meta.resolution() < config.pipeline.min_resolution {
        metrics.inc(&metrics.below_min_resolution);
        debug!(
            "Skipping {}: resolution {}x{} below minimum",
            artifact.filename, artifact.meta.width, artifact.meta.height
        );
        return;
    }

    // Enhancement is CPU-bound opencv work; keep it off the async pool.
    let enhanced_dir = PathBuf::from(&config.pipeline.enhanced_dir);
    let enhance_src = claimed_path.clone();
    let enhanced_path = match tokio::task::spawn_blocking(move || {
        enhance::enhance_and_save(&enhance_src, &enhanced_dir)
    })
    .await
    {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            metrics.inc(&metrics.artifacts_failed);
            warn!("Enhancement failed for {}: {}", artifact.filename, e);
            return;
        }
        Err(e) => {
            metrics.inc(&metrics.artifacts_failed);
            warn!("Enhancement task panicked for {}: {}", artifact.filename, e);
            return;
        }
    };

    let enhanced_jpeg = match fs::read(&enhanced_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics.inc(&metrics.artifacts_failed);
            warn!("Could not read {}: {}", enhanced_path.display(), e);
            return;
        }
    };

    let read = match reader.read(&enhanced_jpeg).await {
        Ok(read) => read,
        Err(e) => {
            // All backend variants failed. The artifact stays in
            // processed/ as the human-visible signal; it is not retried.
            metrics.inc(&metrics.artifacts_failed);
            warn!("❌ Recognition failed permanently for {}: {}", artifact.filename, e);
            return;
        }
    };
    metrics.inc(&metrics.plates_read);

    let plate = match validator::validate(&read.text) {
        Some(plate) => plate,
        None => {
            metrics.inc(&metrics.plates_invalid);
            debug!(
                "Invalid plate '{}' from {} -- rejected",
                read.text, artifact.filename
            );
            return;
        }
    };

    if !ctx.try_finalize(&plate) {
        metrics.inc(&metrics.plates_duplicate);
        info!("🔁 Duplicate plate {} from {} -- discarded", plate, artifact.filename);
        return;
    }

    // The original annotated crop is what gets persisted, not the
    // OCR-enhanced derivative.
    let original_jpeg = match fs::read(&claimed_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics.inc(&metrics.artifacts_failed);
            warn!("Could not read {}: {}", claimed_path.display(), e);
            return;
        }
    };

    let storage_key = format!("violations/{}", plate);
    let image_url = match publisher.upload_image(&original_jpeg, &storage_key).await {
        Ok(url) => url,
        Err(e) => {
            metrics.inc(&metrics.uploads_failed);
            warn!("Upload abandoned for {}: {}", artifact.filename, e);
            return;
        }
    };

    let violation_timestamp = chrono::DateTime::from_timestamp_millis(
        artifact.meta.timestamp_ms as i64,
    )
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let record = ViolationRecord {
        number_plate: plate.clone(),
        violation_type: config.publisher.violation_type.clone(),
        violation_description: format!(
            "Rider without helmet (track {}, detection confidence {:.2})",
            artifact.meta.track_id, artifact.meta.confidence
        ),
        image_url: image_url.clone(),
        violation_timestamp,
        confidence_score: artifact.meta.confidence,
        vehicle_id: artifact.meta.track_id.to_string(),
        crop_filename: artifact.filename.clone(),
        no_helmet_count: 1,
        location: config.publisher.location.clone(),
        camera_id: config.publisher.camera_id.clone(),
        status: "active".to_string(),
    };

    match publisher.upsert_violation(&record).await {
        Ok(()) => {
            metrics.inc(&metrics.publish_successes);
            info!("✅ {} finalized as {}", artifact.filename, plate);
        }
        Err(e) => {
            metrics.inc(&metrics.publish_failures);
            warn!("Publish abandoned for {}: {}", artifact.filename, e);
            return;
        }
    }

    let result = ArtifactResult {
        original_file: artifact.filename.clone(),
        enhanced_file: enhanced_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        vehicle_id: artifact.meta.track_id,
        resolution: format!("{}x{}", artifact.meta.width, artifact.meta.height),
        confidence: artifact.meta.confidence,
        plate_text: read.text,
        normalized_plate: plate,
        backend: read.backend,
        image_url,
        processed_at: chrono::Utc::now().to_rfc3339(),
    };
    let result_path = PathBuf::from(&config.pipeline.results_dir)
        .join(format!("{}_result.json", artifact.filename.trim_end_matches(".jpg")));
    match serde_json::to_string_pretty(&result) {
        Ok(json) => {
            if let Err(e) = fs::write(&result_path, json) {
                warn!("Could not write {}: {}", result_path.display(), e);
            }
        }
        Err(e) => warn!("Could not serialize result for {}: {}", artifact.filename, e),
    }
}
