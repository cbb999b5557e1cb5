// src/stream.rs
//
// Stream orchestrator: drives the per-frame loop
//
//   capture -> detect (interval-gated) -> ROI filter -> track ->
//   inspect/accumulate -> maybe-emit -> annotate -> publish
//
// Tracking and violation state are mutated strictly in frame order on
// this loop; no two frames' updates interleave. Detection runs on a
// configurable interval decoupled from the display rate. Runtime
// controls are exposed through a shared StreamControls handle so an
// external surface can pause, seek, or retune thresholds while the
// loop runs.

use crate::annotate;
use crate::config::Config;
use crate::crop_emitter::CropEmitter;
use crate::helmet_detection::HelmetDetector;
use crate::metrics::{StreamMetrics, StreamSummary};
use crate::roi::{self, RoiPolygon};
use crate::tracker::VehicleTracker;
use crate::vehicle_detection::YoloDetector;
use crate::video_source::VideoSource;
use crate::violation::{InspectionOutcome, ViolationAccumulator};
use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Rect, Size},
    prelude::*,
    videoio::{VideoWriter, VideoWriterTrait},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared runtime controls for a running stream.
pub struct StreamControls {
    running: AtomicBool,
    detection_enabled: AtomicBool,
    confidence_threshold: Mutex<f32>,
    vehicle_classes: Mutex<Vec<usize>>,
    roi: Mutex<Option<RoiPolygon>>,
}

impl StreamControls {
    pub fn new(config: &Config) -> Self {
        Self {
            running: AtomicBool::new(true),
            detection_enabled: AtomicBool::new(true),
            confidence_threshold: Mutex::new(config.detection.confidence_threshold),
            vehicle_classes: Mutex::new(config.model.vehicle_classes.clone()),
            roi: Mutex::new(None),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn toggle_detection(&self) -> bool {
        let enabled = !self.detection_enabled.load(Ordering::SeqCst);
        self.detection_enabled.store(enabled, Ordering::SeqCst);
        enabled
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::SeqCst)
    }

    /// Threshold must lie in [0, 1].
    pub fn set_confidence(&self, threshold: f32) -> bool {
        if !(0.0..=1.0).contains(&threshold) {
            return false;
        }
        *self.confidence_threshold.lock().unwrap_or_else(|e| e.into_inner()) = threshold;
        true
    }

    pub fn confidence(&self) -> f32 {
        *self.confidence_threshold.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_vehicle_classes(&self, classes: Vec<usize>) {
        *self.vehicle_classes.lock().unwrap_or_else(|e| e.into_inner()) = classes;
    }

    pub fn vehicle_classes(&self) -> Vec<usize> {
        self.vehicle_classes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Install or clear the region-of-interest polygon. Returns false
    /// for a polygon with fewer than 3 points.
    pub fn set_roi(&self, points: Option<Vec<(f32, f32)>>) -> bool {
        let new_roi = match points {
            Some(pts) => match RoiPolygon::new(pts) {
                Some(poly) => Some(poly),
                None => return false,
            },
            None => None,
        };
        *self.roi.lock().unwrap_or_else(|e| e.into_inner()) = new_roi;
        true
    }

    pub fn roi(&self) -> Option<RoiPolygon> {
        self.roi.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct StreamOrchestrator {
    config: Config,
    source: Arc<VideoSource>,
    controls: Arc<StreamControls>,
    metrics: StreamMetrics,
    vehicle_detector: YoloDetector,
    helmet_detector: HelmetDetector,
    tracker: VehicleTracker,
    accumulator: ViolationAccumulator,
    emitter: CropEmitter,
    writer: Option<VideoWriter>,
}

impl StreamOrchestrator {
    pub fn new(
        config: Config,
        source: Arc<VideoSource>,
        controls: Arc<StreamControls>,
    ) -> Result<Self> {
        let vehicle_detector = YoloDetector::new(
            &config.model.vehicle_model_path,
            vec!["vehicle".to_string()],
            &config.model,
            &config.inference,
            config.detection.nms_iou_threshold,
        )?;
        info!("✓ Vehicle detector ready");

        let helmet_detector = HelmetDetector::new(&config)?;
        info!("✓ Helmet detector ready");

        let tracker = VehicleTracker::new(config.tracker.clone());
        let accumulator = ViolationAccumulator::new(config.violation.clone());
        let emitter = CropEmitter::new(config.emitter.clone())?;

        Ok(Self {
            config,
            source,
            controls,
            metrics: StreamMetrics::new(),
            vehicle_detector,
            helmet_detector,
            tracker,
            accumulator,
            emitter,
            writer: None,
        })
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Run the frame loop until the source ends or the controls stop it.
    /// The capture resource is released on every exit path.
    pub fn run(&mut self) -> Result<StreamSummary> {
        let result = self.run_loop();
        // Deterministic release; a second call from a signal handler is a no-op.
        self.source.stop();
        result?;
        Ok(self.metrics.summary())
    }

    fn run_loop(&mut self) -> Result<()> {
        let detect_interval = self.config.detection.detection_interval_frames.max(1);
        let frame_pause = Duration::from_secs_f64(1.0 / self.source.fps.max(1.0));

        while self.controls.is_running() {
            if self.source.is_paused() {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }

            let frame = match self.source.read_frame()? {
                Some(frame) => frame,
                None => {
                    info!("End of stream at frame {}", self.source.current_frame());
                    break;
                }
            };
            self.metrics.inc(&self.metrics.total_frames);

            if self.controls.detection_enabled() && frame.frame_id % detect_interval == 0 {
                self.detect_and_accumulate(&frame);
            }

            let mut display = frame.mat;
            if let Err(e) = self.annotate_frame(&mut display) {
                debug!("Annotation failed on frame {}: {}", frame.frame_id, e);
            }
            self.publish_frame(&display)?;

            if frame.frame_id % 150 == 0 {
                self.log_progress();
            }

            if self.source.is_file() {
                std::thread::sleep(frame_pause);
            }
        }

        Ok(())
    }

    /// Detection, tracking and violation accumulation for one frame. A
    /// failed detector call degrades to a skipped frame, never a halt.
    fn detect_and_accumulate(&mut self, frame: &crate::types::Frame) {
        let threshold = self.controls.confidence();
        let classes = self.controls.vehicle_classes();

        self.metrics.inc(&self.metrics.detection_runs);
        let detections =
            match self
                .vehicle_detector
                .detect(&frame.mat, threshold, Some(&classes))
            {
                Ok(dets) => dets,
                Err(e) => {
                    warn!("Vehicle detection failed on frame {}: {}", frame.frame_id, e);
                    self.metrics.inc(&self.metrics.frames_skipped);
                    return;
                }
            };

        let roi = self.controls.roi();
        let detections = roi::filter_detections(detections, roi.as_ref());
        self.metrics
            .add(&self.metrics.vehicles_detected, detections.len() as u64);

        let evicted = self.tracker.update(&detections, frame.frame_id);
        self.accumulator.prune(&evicted);
        let created = self
            .tracker
            .tracks()
            .iter()
            .filter(|t| t.age == 1)
            .count() as u64;
        self.metrics.add(&self.metrics.tracks_created, created);

        // Collect candidates first; the inspection pass needs the
        // detectors mutably.
        let candidates: Vec<(u32, [f32; 4], f32, f32)> = self
            .tracker
            .live_tracks()
            .map(|t| (t.id, t.bbox, t.width(), t.height()))
            .collect();

        for (track_id, bbox, width, height) in candidates {
            if !self
                .accumulator
                .should_inspect(track_id, width, height, frame.frame_id)
            {
                continue;
            }

            self.metrics.inc(&self.metrics.inspections);
            let outcome = match self.inspect_crop(&frame.mat, &bbox, threshold) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Helmet inspection failed for track {}: {}", track_id, e);
                    self.metrics.inc(&self.metrics.inspection_errors);
                    InspectionOutcome::Inconclusive
                }
            };

            if let Some(emit) = self
                .accumulator
                .record_inspection(track_id, frame.frame_id, outcome)
            {
                self.metrics.inc(&self.metrics.violations_confirmed);
                if let Some(track) = self.tracker.get(emit.track_id) {
                    match self.emitter.emit(
                        &frame.mat,
                        track,
                        emit.no_helmet_count,
                        emit.confidence,
                        frame.frame_id,
                    ) {
                        Ok(Some(_path)) => {
                            self.metrics.inc(&self.metrics.artifacts_emitted);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Artifact emission failed for track {}: {}", track_id, e),
                    }
                }
            }
        }
    }

    fn inspect_crop(
        &mut self,
        frame: &Mat,
        bbox: &[f32; 4],
        threshold: f32,
    ) -> Result<InspectionOutcome> {
        let frame_w = frame.cols();
        let frame_h = frame.rows();
        let x1 = (bbox[0].max(0.0) as i32).min(frame_w);
        let y1 = (bbox[1].max(0.0) as i32).min(frame_h);
        let x2 = (bbox[2].max(0.0) as i32).min(frame_w);
        let y2 = (bbox[3].max(0.0) as i32).min(frame_h);
        if x2 <= x1 || y2 <= y1 {
            return Ok(InspectionOutcome::Inconclusive);
        }

        let roi = Mat::roi(frame, Rect::new(x1, y1, x2 - x1, y2 - y1))?;
        let crop = roi.try_clone()?;
        self.helmet_detector.inspect(&crop, threshold)
    }

    fn annotate_frame(&self, display: &mut Mat) -> Result<()> {
        if let Some(roi) = self.controls.roi() {
            annotate::draw_roi(display, &roi)?;
        }

        for track in self.tracker.live_tracks() {
            annotate::draw_track(display, track, self.accumulator.no_helmet_count(track.id))?;
        }

        let info = format!(
            "Conf: {:.2} | Detection: {} | Tracks: {} | Violations: {}",
            self.controls.confidence(),
            if self.controls.detection_enabled() { "on" } else { "off" },
            self.tracker.tracks().len(),
            self.metrics.summary().violations_confirmed,
        );
        annotate::draw_info_line(display, &info)?;
        annotate::draw_timestamp(display)?;
        Ok(())
    }

    fn publish_frame(&mut self, display: &Mat) -> Result<()> {
        if !self.config.video.save_annotated {
            return Ok(());
        }

        if self.writer.is_none() {
            std::fs::create_dir_all(&self.config.video.output_dir)?;
            let path = std::path::Path::new(&self.config.video.output_dir).join(format!(
                "annotated_{}.mp4",
                chrono::Utc::now().format("%Y%m%d_%H%M%S")
            ));
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
            let writer = VideoWriter::new(
                path.to_str().context("Output path is not valid UTF-8")?,
                fourcc,
                self.source.fps,
                Size::new(display.cols(), display.rows()),
                true,
            )?;
            info!("Annotated output: {}", path.display());
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(display)?;
        }
        Ok(())
    }

    fn log_progress(&self) {
        let summary = self.metrics.summary();
        if self.source.is_file() {
            info!(
                "Progress: {:.1}% ({}/{}) | {:.1} FPS | tracks: {} | violations: {} | artifacts: {}",
                self.source.progress(),
                self.source.current_frame(),
                self.source.total_frames,
                summary.fps,
                self.tracker.tracks().len(),
                summary.violations_confirmed,
                summary.artifacts_emitted,
            );
        } else {
            info!(
                "Frame {} | {:.1} FPS | tracks: {} | violations: {} | artifacts: {}",
                summary.total_frames,
                summary.fps,
                self.tracker.tracks().len(),
                summary.violations_confirmed,
                summary.artifacts_emitted,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn controls() -> StreamControls {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        StreamControls::new(&config)
    }

    #[test]
    fn test_confidence_bounds() {
        let controls = controls();
        assert!(controls.set_confidence(0.5));
        assert!((controls.confidence() - 0.5).abs() < f32::EPSILON);
        assert!(!controls.set_confidence(1.5));
        assert!(!controls.set_confidence(-0.1));
        assert!((controls.confidence() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_toggle_detection() {
        let controls = controls();
        assert!(controls.detection_enabled());
        assert!(!controls.toggle_detection());
        assert!(!controls.detection_enabled());
        assert!(controls.toggle_detection());
    }

    #[test]
    fn test_roi_requires_polygon() {
        let controls = controls();
        assert!(!controls.set_roi(Some(vec![(0.0, 0.0), (10.0, 0.0)])));
        assert!(controls.roi().is_none());

        assert!(controls.set_roi(Some(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)])));
        assert!(controls.roi().is_some());

        assert!(controls.set_roi(None));
        assert!(controls.roi().is_none());
    }

    #[test]
    fn test_stop_flag() {
        let controls = controls();
        assert!(controls.is_running());
        controls.stop();
        assert!(!controls.is_running());
    }
}
