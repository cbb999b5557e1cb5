// src/artifact.rs
//
// Violation artifact filename codec. The filename is the only metadata
// channel between the live engine and the enrichment pipeline, so both
// sides share this module:
//
//   violation_vehicle_{timestamp_ms}_ID{track_id}_{w}x{h}_conf{c:.2}.jpg

use once_cell::sync::Lazy;
use regex::Regex;

static FILENAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^violation_vehicle_(\d+)_ID(\d+)_(\d+)x(\d+)_conf(\d+\.\d{2})\.jpg$")
        .expect("artifact filename regex must compile")
});

/// Metadata recoverable from an artifact filename without a side channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMeta {
    pub timestamp_ms: u64,
    pub track_id: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl ArtifactMeta {
    pub fn filename(&self) -> String {
        format!(
            "violation_vehicle_{}_ID{}_{}x{}_conf{:.2}.jpg",
            self.timestamp_ms, self.track_id, self.width, self.height, self.confidence
        )
    }

    /// Parse a filename emitted by the crop emitter. Anything that does
    /// not match the expected pattern is not an artifact.
    pub fn parse(filename: &str) -> Option<Self> {
        let caps = FILENAME_REGEX.captures(filename)?;
        Some(Self {
            timestamp_ms: caps[1].parse().ok()?,
            track_id: caps[2].parse().ok()?,
            width: caps[3].parse().ok()?,
            height: caps[4].parse().ok()?,
            confidence: caps[5].parse().ok()?,
        })
    }

    pub fn resolution(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_round_trip() {
        let meta = ArtifactMeta {
            timestamp_ms: 1714000123456,
            track_id: 7,
            width: 312,
            height: 520,
            confidence: 0.6,
        };
        let name = meta.filename();
        assert_eq!(
            name,
            "violation_vehicle_1714000123456_ID7_312x520_conf0.60.jpg"
        );
        assert_eq!(ArtifactMeta::parse(&name), Some(meta));
    }

    #[test]
    fn test_confidence_encoded_two_decimals() {
        let meta = ArtifactMeta {
            timestamp_ms: 1,
            track_id: 1,
            width: 300,
            height: 500,
            confidence: 0.596,
        };
        assert!(meta.filename().contains("conf0.60"));
    }

    #[test]
    fn test_rejects_foreign_filenames() {
        assert!(ArtifactMeta::parse("vehicle_123_ID4_100x200_conf0.50.jpg").is_none());
        assert!(ArtifactMeta::parse("violation_vehicle_1_ID2_3x4_conf0.50.jpg.tmp").is_none());
        assert!(ArtifactMeta::parse("violation_vehicle_abc_ID2_3x4_conf0.50.jpg").is_none());
        assert!(ArtifactMeta::parse("notes.txt").is_none());
    }

    #[test]
    fn test_resolution() {
        let meta = ArtifactMeta {
            timestamp_ms: 0,
            track_id: 0,
            width: 200,
            height: 400,
            confidence: 0.5,
        };
        assert_eq!(meta.resolution(), 80_000);
    }
}
