// src/violation.rs
//
// Per-track helmet violation state machine:
//
//   Uninspected -> Inspecting -> Confirmed
//
// A track is inspected only when its crop passes the minimum-size gate
// and the re-inspection interval has elapsed. Consecutive no-helmet
// results accumulate; reaching the confirm threshold triggers exactly
// one emission, then the counter is held (not reset) and further
// emissions are suppressed until the cooldown window elapses. A vehicle
// that stays unhelmeted is therefore re-captured periodically instead
// of being reported once.

use crate::config::ViolationConfig;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionState {
    Uninspected,
    Inspecting,
    Confirmed,
}

/// Rolling helmet evidence for one tracked identity. Never persisted;
/// consumed to decide confirmation, then pruned with its track.
#[derive(Debug, Clone)]
pub struct HelmetEvidence {
    pub state: InspectionState,
    pub last_inspected_frame: Option<u64>,
    pub consecutive_no_helmet: u32,
    pub last_confidence: f32,
    pub last_emitted_frame: Option<u64>,
}

impl HelmetEvidence {
    fn new() -> Self {
        Self {
            state: InspectionState::Uninspected,
            last_inspected_frame: None,
            consecutive_no_helmet: 0,
            last_confidence: 0.0,
            last_emitted_frame: None,
        }
    }
}

/// Outcome of one helmet-detector call on a track crop.
#[derive(Debug, Clone)]
pub enum InspectionOutcome {
    /// Top result was a no-helmet class above the confidence threshold
    NoHelmet { confidence: f32 },
    /// Top result was anything else (helmet, or nothing detected)
    HelmetOrClear,
    /// Detector call failed -- inconclusive, retry at the next eligible frame
    Inconclusive,
}

/// Emission request produced when a track crosses into (or re-confirms)
/// a violation after the cooldown.
#[derive(Debug, Clone)]
pub struct EmitRequest {
    pub track_id: u32,
    pub no_helmet_count: u32,
    pub confidence: f32,
}

pub struct ViolationAccumulator {
    config: ViolationConfig,
    evidence: HashMap<u32, HelmetEvidence>,
}

impl ViolationAccumulator {
    pub fn new(config: ViolationConfig) -> Self {
        Self {
            config,
            evidence: HashMap::new(),
        }
    }

    /// Whether a track is due for a helmet inspection this frame.
    /// Both minimum dimensions must hold independently, and the
    /// re-inspection interval must have elapsed since the last
    /// conclusive inspection.
    pub fn should_inspect(&self, track_id: u32, width: f32, height: f32, frame_id: u64) -> bool {
        if (width as u32) < self.config.min_crop_width
            || (height as u32) < self.config.min_crop_height
        {
            return false;
        }
        match self.evidence.get(&track_id).and_then(|e| e.last_inspected_frame) {
            Some(last) => frame_id.saturating_sub(last) >= self.config.reinspect_interval_frames,
            None => true,
        }
    }

    /// Record an inspection result for a track. Returns an emission
    /// request when the violation is confirmed (or re-confirmed after
    /// the cooldown window).
    pub fn record_inspection(
        &mut self,
        track_id: u32,
        frame_id: u64,
        outcome: InspectionOutcome,
    ) -> Option<EmitRequest> {
        let evidence = self
            .evidence
            .entry(track_id)
            .or_insert_with(HelmetEvidence::new);

        match outcome {
            InspectionOutcome::Inconclusive => {
                // State unchanged. last_inspected_frame is deliberately
                // not advanced so the retry happens at the next eligible
                // frame, not a full interval later.
                debug!("Track {} inspection inconclusive at frame {}", track_id, frame_id);
                None
            }
            InspectionOutcome::HelmetOrClear => {
                evidence.last_inspected_frame = Some(frame_id);
                evidence.consecutive_no_helmet = 0;
                evidence.state = InspectionState::Uninspected;
                None
            }
            InspectionOutcome::NoHelmet { confidence } => {
                evidence.last_inspected_frame = Some(frame_id);
                evidence.consecutive_no_helmet += 1;
                evidence.last_confidence = confidence;

                if evidence.state == InspectionState::Uninspected {
                    evidence.state = InspectionState::Inspecting;
                }

                if evidence.consecutive_no_helmet < self.config.confirm_threshold {
                    return None;
                }

                match evidence.state {
                    InspectionState::Confirmed => {
                        // Counter held; re-emit only once the cooldown
                        // window has elapsed.
                        let since_emit = evidence
                            .last_emitted_frame
                            .map(|f| frame_id.saturating_sub(f))
                            .unwrap_or(u64::MAX);
                        if since_emit >= self.config.cooldown_frames {
                            evidence.last_emitted_frame = Some(frame_id);
                            info!(
                                "Track {} re-confirmed after cooldown (count={})",
                                track_id, evidence.consecutive_no_helmet
                            );
                            Some(EmitRequest {
                                track_id,
                                no_helmet_count: evidence.consecutive_no_helmet,
                                confidence,
                            })
                        } else {
                            None
                        }
                    }
                    _ => {
                        evidence.state = InspectionState::Confirmed;
                        evidence.last_emitted_frame = Some(frame_id);
                        info!(
                            "Track {} violation CONFIRMED at frame {} (count={}, conf={:.2})",
                            track_id, frame_id, evidence.consecutive_no_helmet, confidence
                        );
                        Some(EmitRequest {
                            track_id,
                            no_helmet_count: evidence.consecutive_no_helmet,
                            confidence,
                        })
                    }
                }
            }
        }
    }

    /// Drop evidence for evicted tracks so no state can reference a
    /// pre-eviction identity.
    pub fn prune(&mut self, evicted: &[u32]) {
        for id in evicted {
            self.evidence.remove(id);
        }
    }

    pub fn no_helmet_count(&self, track_id: u32) -> u32 {
        self.evidence
            .get(&track_id)
            .map(|e| e.consecutive_no_helmet)
            .unwrap_or(0)
    }

    pub fn state(&self, track_id: u32) -> InspectionState {
        self.evidence
            .get(&track_id)
            .map(|e| e.state)
            .unwrap_or(InspectionState::Uninspected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViolationConfig;

    fn config() -> ViolationConfig {
        ViolationConfig {
            reinspect_interval_frames: 10,
            confirm_threshold: 2,
            cooldown_frames: 50,
            no_helmet_confidence: 0.4,
            no_helmet_classes: vec!["no_helmet".to_string()],
            min_crop_width: 290,
            min_crop_height: 450,
        }
    }

    fn no_helmet() -> InspectionOutcome {
        InspectionOutcome::NoHelmet { confidence: 0.6 }
    }

    #[test]
    fn test_size_gate_is_independent_per_dimension() {
        let acc = ViolationAccumulator::new(config());
        // Wide enough but too short
        assert!(!acc.should_inspect(1, 300.0, 400.0, 1));
        // Tall enough but too narrow
        assert!(!acc.should_inspect(1, 280.0, 500.0, 1));
        // Both satisfied
        assert!(acc.should_inspect(1, 300.0, 500.0, 1));
    }

    #[test]
    fn test_no_double_increment_within_interval() {
        let mut acc = ViolationAccumulator::new(config());
        assert!(acc.should_inspect(1, 300.0, 500.0, 100));
        acc.record_inspection(1, 100, no_helmet());
        assert_eq!(acc.no_helmet_count(1), 1);

        // Within the interval the track is simply not eligible, so the
        // counter cannot advance twice.
        for frame in 101..110 {
            assert!(!acc.should_inspect(1, 300.0, 500.0, frame));
        }
        assert!(acc.should_inspect(1, 300.0, 500.0, 110));
    }

    #[test]
    fn test_confirm_after_two_consecutive_inspections() {
        let mut acc = ViolationAccumulator::new(config());
        assert!(acc.record_inspection(1, 100, no_helmet()).is_none());
        assert_eq!(acc.state(1), InspectionState::Inspecting);

        let emit = acc.record_inspection(1, 110, no_helmet());
        let emit = emit.expect("second consecutive no-helmet should confirm");
        assert_eq!(emit.track_id, 1);
        assert_eq!(emit.no_helmet_count, 2);
        assert_eq!(acc.state(1), InspectionState::Confirmed);
    }

    #[test]
    fn test_helmet_resets_counter_and_state() {
        let mut acc = ViolationAccumulator::new(config());
        acc.record_inspection(1, 100, no_helmet());
        acc.record_inspection(1, 110, InspectionOutcome::HelmetOrClear);
        assert_eq!(acc.no_helmet_count(1), 0);
        assert_eq!(acc.state(1), InspectionState::Uninspected);

        // Needs the full threshold again
        assert!(acc.record_inspection(1, 120, no_helmet()).is_none());
        assert!(acc.record_inspection(1, 130, no_helmet()).is_some());
    }

    #[test]
    fn test_no_second_emission_before_cooldown() {
        let mut acc = ViolationAccumulator::new(config());
        acc.record_inspection(1, 100, no_helmet());
        assert!(acc.record_inspection(1, 110, no_helmet()).is_some());

        // Still unhelmeted, but inside the 50-frame cooldown
        assert!(acc.record_inspection(1, 120, no_helmet()).is_none());
        assert!(acc.record_inspection(1, 140, no_helmet()).is_none());

        // Past frame 110 + 50 the track may re-confirm and emit again
        let emit = acc.record_inspection(1, 165, no_helmet());
        let emit = emit.expect("should re-emit after cooldown");
        assert!(emit.no_helmet_count > 2, "counter is held, not reset");
    }

    #[test]
    fn test_inconclusive_leaves_state_unchanged() {
        let mut acc = ViolationAccumulator::new(config());
        acc.record_inspection(1, 100, no_helmet());

        assert!(acc
            .record_inspection(1, 110, InspectionOutcome::Inconclusive)
            .is_none());
        assert_eq!(acc.no_helmet_count(1), 1);
        assert_eq!(acc.state(1), InspectionState::Inspecting);

        // The failed inspection must not consume the interval: the track
        // stays eligible immediately.
        assert!(acc.should_inspect(1, 300.0, 500.0, 111));
    }

    #[test]
    fn test_prune_drops_evidence() {
        let mut acc = ViolationAccumulator::new(config());
        acc.record_inspection(1, 100, no_helmet());
        acc.prune(&[1]);
        assert_eq!(acc.no_helmet_count(1), 0);
        assert_eq!(acc.state(1), InspectionState::Uninspected);
    }
}
