// src/crop_emitter.rs
//
// Renders the violation artifact for a confirmed track: pads the box to
// keep the plate visible, enforces the minimum crop size, annotates
// identity and no-helmet count, and writes the JPEG under a temporary
// name before renaming it into the handoff directory so the watcher can
// never observe a partial file.

use crate::artifact::ArtifactMeta;
use crate::config::EmitterConfig;
use crate::tracker::Track;
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Rect},
    imgcodecs, imgproc,
    prelude::*,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Pad a bbox by `pad_ratio` of its own size and clamp to the frame.
/// Returns (x, y, w, h) or None for a degenerate region.
pub fn padded_region(
    bbox: &[f32; 4],
    pad_ratio: f32,
    frame_w: i32,
    frame_h: i32,
) -> Option<(i32, i32, i32, i32)> {
    let bw = bbox[2] - bbox[0];
    let bh = bbox[3] - bbox[1];
    if bw <= 0.0 || bh <= 0.0 {
        return None;
    }

    let pad_x = bw * pad_ratio;
    let pad_y = bh * pad_ratio;

    let x1 = (bbox[0] - pad_x).max(0.0) as i32;
    let y1 = (bbox[1] - pad_y).max(0.0) as i32;
    let x2 = ((bbox[2] + pad_x) as i32).min(frame_w);
    let y2 = ((bbox[3] + pad_y) as i32).min(frame_h);

    let w = x2 - x1;
    let h = y2 - y1;
    if w <= 0 || h <= 0 {
        return None;
    }
    Some((x1, y1, w, h))
}

/// Both minimum dimensions must hold independently.
pub fn passes_min_size(width: i32, height: i32, min_width: u32, min_height: u32) -> bool {
    width as u32 >= min_width && height as u32 >= min_height
}

pub struct CropEmitter {
    config: EmitterConfig,
    /// track id -> frame of last emitted artifact
    last_emit: HashMap<u32, u64>,
}

impl CropEmitter {
    pub fn new(config: EmitterConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("Failed to create {}", config.output_dir))?;
        Ok(Self {
            config,
            last_emit: HashMap::new(),
        })
    }

    /// Whether the per-identity cooldown allows another artifact.
    pub fn debounce_allows(&self, track_id: u32, frame_id: u64) -> bool {
        match self.last_emit.get(&track_id) {
            Some(last) => frame_id.saturating_sub(*last) >= self.config.cooldown_frames,
            None => true,
        }
    }

    /// Emit an annotated crop for a confirmed violation. Returns None
    /// when the debounce window or the minimum crop size rejects it.
    pub fn emit(
        &mut self,
        frame: &Mat,
        track: &Track,
        no_helmet_count: u32,
        confidence: f32,
        frame_id: u64,
    ) -> Result<Option<PathBuf>> {
        if !self.debounce_allows(track.id, frame_id) {
            debug!(
                "Track {} artifact suppressed (cooldown, frame {})",
                track.id, frame_id
            );
            return Ok(None);
        }

        let frame_w = frame.cols();
        let frame_h = frame.rows();
        let region = match padded_region(&track.bbox, self.config.pad_ratio, frame_w, frame_h) {
            Some(r) => r,
            None => return Ok(None),
        };
        let (x, y, w, h) = region;

        if !passes_min_size(w, h, self.config.min_width, self.config.min_height) {
            debug!(
                "Track {} crop skipped: {}x{} below minimum {}x{}",
                track.id, w, h, self.config.min_width, self.config.min_height
            );
            return Ok(None);
        }

        let roi = Mat::roi(frame, Rect::new(x, y, w, h))?;
        let mut crop = roi.try_clone()?;
        annotate_crop(&mut crop, track.id, no_helmet_count, confidence)?;

        let meta = ArtifactMeta {
            timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
            track_id: track.id,
            width: w as u32,
            height: h as u32,
            confidence,
        };
        let filename = meta.filename();

        // Write under a prefix the watcher's pattern cannot match, then
        // rename into place. Rename within one directory is atomic with
        // respect to the watcher's polling.
        let out_dir = Path::new(&self.config.output_dir);
        let tmp_path = out_dir.join(format!(".tmp_{}", filename));
        let final_path = out_dir.join(&filename);

        let params = core::Vector::from_slice(&[
            imgcodecs::IMWRITE_JPEG_QUALITY,
            self.config.jpeg_quality,
        ]);
        let tmp_str = tmp_path
            .to_str()
            .context("Artifact path is not valid UTF-8")?;
        if !imgcodecs::imwrite(tmp_str, &crop, &params)? {
            bail!("Failed to encode artifact {}", filename);
        }
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("Failed to publish artifact {}", filename))?;

        self.last_emit.insert(track.id, frame_id);
        info!(
            "💾 Violation artifact emitted: {} ({}x{}, count={})",
            filename, w, h, no_helmet_count
        );
        Ok(Some(final_path))
    }
}

fn annotate_crop(crop: &mut Mat, track_id: u32, no_helmet_count: u32, confidence: f32) -> Result<()> {
    let label = format!(
        "ID {} | no-helmet x{} | {:.2}",
        track_id, no_helmet_count, confidence
    );
    let org = core::Point::new(8, (crop.rows() - 12).max(20));

    // Dark outline then white text for readability on any background
    imgproc::put_text(
        crop,
        &label,
        org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        core::Scalar::new(0.0, 0.0, 0.0, 0.0),
        4,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        crop,
        &label,
        org,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmitterConfig;

    fn config() -> EmitterConfig {
        EmitterConfig {
            output_dir: "violation".to_string(),
            pad_ratio: 0.1,
            min_width: 290,
            min_height: 450,
            jpeg_quality: 85,
            cooldown_frames: 50,
        }
    }

    #[test]
    fn test_padded_region_clamps_to_frame() {
        // Box near the origin: padding cannot go negative
        let region = padded_region(&[5.0, 5.0, 105.0, 205.0], 0.1, 1280, 720);
        let (x, y, w, h) = region.unwrap();
        assert_eq!((x, y), (0, 0));
        assert!(w >= 100 && h >= 200);

        // Box at the far edge: padding cannot exceed the frame
        let region = padded_region(&[1200.0, 600.0, 1280.0, 720.0], 0.2, 1280, 720);
        let (x, y, w, h) = region.unwrap();
        assert!(x + w <= 1280);
        assert!(y + h <= 720);
    }

    #[test]
    fn test_padded_region_rejects_degenerate_boxes() {
        assert!(padded_region(&[100.0, 100.0, 100.0, 200.0], 0.1, 1280, 720).is_none());
        assert!(padded_region(&[100.0, 200.0, 200.0, 100.0], 0.1, 1280, 720).is_none());
    }

    #[test]
    fn test_min_size_dimensions_independent() {
        // Large width cannot compensate for a short crop, and vice versa
        assert!(!passes_min_size(800, 400, 290, 450));
        assert!(!passes_min_size(200, 800, 290, 450));
        assert!(passes_min_size(290, 450, 290, 450));
    }

    #[test]
    fn test_debounce_window() {
        let mut emitter = CropEmitter {
            config: config(),
            last_emit: HashMap::new(),
        };

        assert!(emitter.debounce_allows(1, 100));
        emitter.last_emit.insert(1, 100);

        assert!(!emitter.debounce_allows(1, 120));
        assert!(!emitter.debounce_allows(1, 149));
        assert!(emitter.debounce_allows(1, 150));

        // Other identities are unaffected
        assert!(emitter.debounce_allows(2, 120));
    }
}
