// src/tracker.rs
//
// Greedy IoU-based multi-object tracker assigning persistent identities
// to vehicle detections across frames.
//
// Design:
//   - Matching is a pure function over (tracks, detections) so it can be
//     unit-tested without any video or model in the loop
//   - Highest global IoU pairs first; ties broken by detection confidence
//   - Identities are monotonically increasing and never reused while the
//     tracker is alive
//   - Tracks coast through brief detection gaps and are evicted after
//     max_missed_frames consecutive misses

use crate::config::TrackerConfig;
use crate::types::Detection;
use tracing::{debug, info};

/// A tracked vehicle identity.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub last_confidence: f32,
    /// Frames this track has existed
    pub age: u32,
    /// Consecutive frames without a matching detection
    pub frames_since_hit: u32,
    pub last_seen_frame: u64,
}

impl Track {
    fn new(id: u32, det: &Detection, frame_id: u64) -> Self {
        Self {
            id,
            bbox: det.bbox,
            class_id: det.class_id,
            last_confidence: det.confidence,
            age: 1,
            frames_since_hit: 0,
            last_seen_frame: frame_id,
        }
    }

    pub fn width(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Result of one frame's assignment pass. Indices refer into the input
/// slices; no track or detection index appears in more than one list.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// (track index, detection index) pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy bipartite assignment by IoU.
///
/// Candidate pairs below `min_iou` or across different classes are
/// discarded. Remaining pairs are consumed highest-IoU first; when two
/// pairs tie, the detection with higher confidence wins. This is a
/// best-effort heuristic, not globally optimal -- it is deterministic
/// and cheap enough for the per-frame budget.
pub fn match_detections(
    tracks: &[Track],
    detections: &[Detection],
    min_iou: f32,
) -> MatchOutcome {
    let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
    for (ti, track) in tracks.iter().enumerate() {
        for (di, det) in detections.iter().enumerate() {
            if track.class_id != det.class_id {
                continue;
            }
            let score = iou(&track.bbox, &det.bbox);
            if score >= min_iou {
                pairs.push((ti, di, score));
            }
        }
    }

    pairs.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                detections[b.1]
                    .confidence
                    .partial_cmp(&detections[a.1].confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut track_taken = vec![false; tracks.len()];
    let mut det_taken = vec![false; detections.len()];
    let mut outcome = MatchOutcome::default();

    for (ti, di, _score) in pairs {
        if track_taken[ti] || det_taken[di] {
            continue;
        }
        track_taken[ti] = true;
        det_taken[di] = true;
        outcome.matches.push((ti, di));
    }

    outcome.unmatched_tracks = track_taken
        .iter()
        .enumerate()
        .filter(|(_, taken)| !**taken)
        .map(|(i, _)| i)
        .collect();
    outcome.unmatched_detections = det_taken
        .iter()
        .enumerate()
        .filter(|(_, taken)| !**taken)
        .map(|(i, _)| i)
        .collect();

    outcome
}

pub struct VehicleTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl VehicleTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(32),
            next_id: 1,
        }
    }

    /// Process one frame of detections. Returns the surviving tracks and
    /// the ids evicted this frame (so dependent state can be pruned).
    pub fn update(&mut self, detections: &[Detection], frame_id: u64) -> Vec<u32> {
        let outcome = match_detections(&self.tracks, detections, self.config.min_iou);

        for (ti, di) in &outcome.matches {
            let track = &mut self.tracks[*ti];
            let det = &detections[*di];
            track.bbox = det.bbox;
            track.last_confidence = det.confidence;
            track.age += 1;
            track.frames_since_hit = 0;
            track.last_seen_frame = frame_id;
        }

        for ti in &outcome.unmatched_tracks {
            let track = &mut self.tracks[*ti];
            track.frames_since_hit += 1;
            track.age += 1;
        }

        for di in &outcome.unmatched_detections {
            let track = Track::new(self.next_id, &detections[*di], frame_id);
            debug!(
                "New track T{}: class={}, bbox=[{:.0},{:.0},{:.0},{:.0}]",
                track.id, track.class_id, track.bbox[0], track.bbox[1], track.bbox[2],
                track.bbox[3]
            );
            self.next_id += 1;
            self.tracks.push(track);
        }

        let max_missed = self.config.max_missed_frames;
        let mut evicted = Vec::new();
        self.tracks.retain(|t| {
            if t.frames_since_hit > max_missed {
                info!("Track {} evicted (missed {} frames)", t.id, t.frames_since_hit);
                evicted.push(t.id);
                false
            } else {
                true
            }
        });

        evicted
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Tracks matched in the current frame (fresh boxes only).
    pub fn live_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.frames_since_hit == 0)
    }

    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection {
            bbox: [x1, y1, x2, y2],
            confidence: conf,
            class_id: 0,
            class_name: "vehicle".to_string(),
        }
    }

    fn tracker() -> VehicleTracker {
        VehicleTracker::new(TrackerConfig {
            min_iou: 0.3,
            max_missed_frames: 3,
        })
    }

    #[test]
    fn test_iou_overlap() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        let score = iou(&a, &b);
        assert!((score - 2500.0 / 17500.0).abs() < 0.01);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = [0.0, 0.0, 50.0, 50.0];
        let b = [100.0, 100.0, 200.0, 200.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_new_detection_spawns_track() {
        let mut tracker = tracker();
        tracker.update(&[det(100.0, 100.0, 200.0, 300.0, 0.8)], 1);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].id, 1);
    }

    #[test]
    fn test_track_keeps_id_across_frames() {
        let mut tracker = tracker();
        tracker.update(&[det(100.0, 100.0, 200.0, 300.0, 0.8)], 1);
        // Slightly shifted box, well above the IoU threshold
        tracker.update(&[det(105.0, 102.0, 205.0, 302.0, 0.7)], 2);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].id, 1);
        assert_eq!(tracker.tracks()[0].age, 2);
    }

    #[test]
    fn test_ids_monotonic_never_reused() {
        let mut tracker = tracker();
        tracker.update(&[det(100.0, 100.0, 200.0, 300.0, 0.8)], 1);
        assert_eq!(tracker.tracks()[0].id, 1);

        // Let the track die
        for frame in 2..=6 {
            tracker.update(&[], frame);
        }
        assert!(tracker.tracks().is_empty());

        // Same region again -- must get a fresh, larger id
        tracker.update(&[det(100.0, 100.0, 200.0, 300.0, 0.8)], 7);
        assert_eq!(tracker.tracks()[0].id, 2);

        tracker.update(
            &[
                det(100.0, 100.0, 200.0, 300.0, 0.8),
                det(600.0, 100.0, 700.0, 300.0, 0.9),
            ],
            8,
        );
        let mut ids: Vec<u32> = tracker.tracks().iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_eviction_after_max_missed() {
        let mut tracker = tracker();
        tracker.update(&[det(100.0, 100.0, 200.0, 300.0, 0.8)], 1);

        let mut evicted = Vec::new();
        for frame in 2..=6 {
            evicted = tracker.update(&[], frame);
            if !evicted.is_empty() {
                break;
            }
        }
        assert_eq!(evicted, vec![1]);
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_greedy_prefers_highest_iou() {
        let mut tracker = tracker();
        tracker.update(
            &[
                det(0.0, 0.0, 100.0, 100.0, 0.8),
                det(200.0, 0.0, 300.0, 100.0, 0.8),
            ],
            1,
        );

        // One detection overlaps both tracks; it must pair with the
        // closer one and leave the other unmatched.
        let outcome = match_detections(
            tracker.tracks(),
            &[det(10.0, 0.0, 110.0, 100.0, 0.9)],
            0.3,
        );
        assert_eq!(outcome.matches, vec![(0, 0)]);
        assert_eq!(outcome.unmatched_tracks, vec![1]);
        assert!(outcome.unmatched_detections.is_empty());
    }

    #[test]
    fn test_tie_broken_by_confidence() {
        let mut tracker = tracker();
        tracker.update(&[det(0.0, 0.0, 100.0, 100.0, 0.8)], 1);

        // Two identical boxes with equal IoU to the track -- the higher
        // confidence one must win the pairing.
        let dets = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.5),
            det(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let outcome = match_detections(tracker.tracks(), &dets, 0.3);
        assert_eq!(outcome.matches, vec![(0, 1)]);
        assert_eq!(outcome.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_below_threshold_spawns_instead_of_matching() {
        let mut tracker = tracker();
        tracker.update(&[det(0.0, 0.0, 100.0, 100.0, 0.8)], 1);

        // Barely-overlapping detection: IoU well under 0.3
        tracker.update(&[det(90.0, 90.0, 190.0, 190.0, 0.8)], 2);
        assert_eq!(tracker.tracks().len(), 2);
    }
}
