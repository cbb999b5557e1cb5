// src/metrics.rs
//
// Observability counters for both engines. Atomic so the shared handles
// can be read from control surfaces while the loops run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct StreamMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub detection_runs: Arc<AtomicU64>,
    pub vehicles_detected: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub inspections: Arc<AtomicU64>,
    pub inspection_errors: Arc<AtomicU64>,
    pub violations_confirmed: Arc<AtomicU64>,
    pub artifacts_emitted: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            detection_runs: Arc::new(AtomicU64::new(0)),
            vehicles_detected: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            inspections: Arc::new(AtomicU64::new(0)),
            inspection_errors: Arc::new(AtomicU64::new(0)),
            violations_confirmed: Arc::new(AtomicU64::new(0)),
            artifacts_emitted: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            detection_runs: self.detection_runs.load(Ordering::Relaxed),
            vehicles_detected: self.vehicles_detected.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            inspections: self.inspections.load(Ordering::Relaxed),
            inspection_errors: self.inspection_errors.load(Ordering::Relaxed),
            violations_confirmed: self.violations_confirmed.load(Ordering::Relaxed),
            artifacts_emitted: self.artifacts_emitted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub detection_runs: u64,
    pub vehicles_detected: u64,
    pub tracks_created: u64,
    pub inspections: u64,
    pub inspection_errors: u64,
    pub violations_confirmed: u64,
    pub artifacts_emitted: u64,
    pub frames_skipped: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug)]
pub struct PipelineMetrics {
    pub artifacts_seen: AtomicU64,
    pub artifacts_claimed: AtomicU64,
    pub artifacts_failed: AtomicU64,
    pub below_min_resolution: AtomicU64,
    pub plates_read: AtomicU64,
    pub plates_invalid: AtomicU64,
    pub plates_duplicate: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub publish_successes: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            artifacts_seen: AtomicU64::new(0),
            artifacts_claimed: AtomicU64::new(0),
            artifacts_failed: AtomicU64::new(0),
            below_min_resolution: AtomicU64::new(0),
            plates_read: AtomicU64::new(0),
            plates_invalid: AtomicU64::new(0),
            plates_duplicate: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
            publish_successes: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            artifacts_seen: self.artifacts_seen.load(Ordering::Relaxed),
            artifacts_claimed: self.artifacts_claimed.load(Ordering::Relaxed),
            artifacts_failed: self.artifacts_failed.load(Ordering::Relaxed),
            below_min_resolution: self.below_min_resolution.load(Ordering::Relaxed),
            plates_read: self.plates_read.load(Ordering::Relaxed),
            plates_invalid: self.plates_invalid.load(Ordering::Relaxed),
            plates_duplicate: self.plates_duplicate.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            publish_successes: self.publish_successes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSummary {
    pub artifacts_seen: u64,
    pub artifacts_claimed: u64,
    pub artifacts_failed: u64,
    pub below_min_resolution: u64,
    pub plates_read: u64,
    pub plates_invalid: u64,
    pub plates_duplicate: u64,
    pub uploads_failed: u64,
    pub publish_successes: u64,
    pub publish_failures: u64,
}
