// src/pipeline/watcher.rs
//
// Polls the handoff directory for violation artifacts and forwards them
// over an async channel -- the message-passing boundary between
// discovery and the worker pool. A true IPC channel could replace the
// polling without changing the consumption side.
//
// Claiming an artifact moves it out of the watched directory into
// processed/, so a claimed file can never be scanned twice even across
// pipeline restarts; the in-memory claim set covers the window between
// discovery and the move.

use crate::artifact::ArtifactMeta;
use crate::config::PipelineConfig;
use crate::pipeline::context::PipelineContext;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A discovered artifact, not yet claimed.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub filename: String,
    pub meta: ArtifactMeta,
}

pub struct ArtifactWatcher {
    watch_dir: PathBuf,
    processed_dir: PathBuf,
    poll_interval: Duration,
}

impl ArtifactWatcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let watch_dir = PathBuf::from(&config.watch_dir);
        let processed_dir = PathBuf::from(&config.processed_dir);
        fs::create_dir_all(&watch_dir)
            .with_context(|| format!("Failed to create {}", watch_dir.display()))?;
        fs::create_dir_all(&processed_dir)
            .with_context(|| format!("Failed to create {}", processed_dir.display()))?;

        Ok(Self {
            watch_dir,
            processed_dir,
            poll_interval: Duration::from_secs_f64(config.poll_interval_secs),
        })
    }

    /// One scan of the watch directory: files matching the artifact
    /// pattern that have not been claimed yet. Foreign files are
    /// ignored.
    pub fn scan(&self, ctx: &PipelineContext) -> Vec<ArtifactRef> {
        let mut found = Vec::new();

        for entry in WalkDir::new(&self.watch_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            let meta = match ArtifactMeta::parse(&filename) {
                Some(meta) => meta,
                None => continue,
            };
            if ctx.is_claimed(&filename) {
                continue;
            }
            found.push(ArtifactRef {
                path: entry.path().to_path_buf(),
                filename,
                meta,
            });
        }

        found
    }

    /// Claim an artifact: record it in the claim set and move the file
    /// into processed/. Returns the new path, or None when another
    /// worker claimed it first or the file vanished.
    pub fn claim(&self, ctx: &PipelineContext, artifact: &ArtifactRef) -> Option<PathBuf> {
        if !ctx.claim(&artifact.filename) {
            debug!("{} already claimed, skipping", artifact.filename);
            return None;
        }

        let dest = self.processed_dir.join(&artifact.filename);
        match fs::rename(&artifact.path, &dest) {
            Ok(()) => {
                ctx.metrics.inc(&ctx.metrics.artifacts_claimed);
                Some(dest)
            }
            Err(e) => {
                warn!("Failed to claim {}: {}", artifact.filename, e);
                None
            }
        }
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Poll until shutdown, forwarding discoveries into the channel.
    pub async fn run(
        &self,
        ctx: Arc<PipelineContext>,
        tx: mpsc::Sender<ArtifactRef>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            "🔍 Watching {} every {:.1}s",
            self.watch_dir.display(),
            self.poll_interval.as_secs_f64()
        );

        loop {
            let found = self.scan(&ctx);
            if !found.is_empty() {
                info!("Found {} new artifact(s)", found.len());
            }
            for artifact in found {
                ctx.metrics.inc(&ctx.metrics.artifacts_seen);
                if tx.send(artifact).await.is_err() {
                    // Consumer gone; nothing left to feed.
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Watcher shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::TempDir;

    fn watcher_in(dir: &TempDir) -> (ArtifactWatcher, PipelineContext) {
        let config = PipelineConfig {
            watch_dir: dir.path().join("violation").to_string_lossy().to_string(),
            processed_dir: dir.path().join("processed").to_string_lossy().to_string(),
            enhanced_dir: dir.path().join("enhanced").to_string_lossy().to_string(),
            results_dir: dir.path().join("results").to_string_lossy().to_string(),
            poll_interval_secs: 0.1,
            worker_count: 2,
            min_resolution: 80_000,
        };
        (ArtifactWatcher::new(&config).unwrap(), PipelineContext::new())
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"jpeg-bytes").unwrap();
    }

    #[test]
    fn test_scan_filters_by_pattern() {
        let tmp = TempDir::new().unwrap();
        let (watcher, ctx) = watcher_in(&tmp);
        let watch = tmp.path().join("violation");

        touch(&watch, "violation_vehicle_1714_ID3_300x500_conf0.60.jpg");
        touch(&watch, "notes.txt");
        touch(&watch, ".tmp_violation_vehicle_1715_ID4_300x500_conf0.70.jpg");

        let found = watcher.scan(&ctx);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].meta.track_id, 3);
        assert_eq!(found[0].meta.width, 300);
    }

    #[test]
    fn test_claim_moves_file_once() {
        let tmp = TempDir::new().unwrap();
        let (watcher, ctx) = watcher_in(&tmp);
        let watch = tmp.path().join("violation");
        touch(&watch, "violation_vehicle_1714_ID3_300x500_conf0.60.jpg");

        let found = watcher.scan(&ctx);
        let claimed = watcher.claim(&ctx, &found[0]);
        let claimed = claimed.expect("first claim succeeds");
        assert!(claimed.exists());
        assert!(!found[0].path.exists());

        // Second claim of the same artifact is refused
        assert!(watcher.claim(&ctx, &found[0]).is_none());
        // And the file no longer shows up in scans
        assert!(watcher.scan(&ctx).is_empty());
    }

    #[test]
    fn test_claimed_names_skipped_even_if_file_returns() {
        let tmp = TempDir::new().unwrap();
        let (watcher, ctx) = watcher_in(&tmp);
        let watch = tmp.path().join("violation");
        let name = "violation_vehicle_1714_ID3_300x500_conf0.60.jpg";

        touch(&watch, name);
        let found = watcher.scan(&ctx);
        watcher.claim(&ctx, &found[0]).unwrap();

        // The same filename reappearing must not be reprocessed in this
        // pipeline's lifetime.
        touch(&watch, name);
        assert!(watcher.scan(&ctx).is_empty());
    }
}
