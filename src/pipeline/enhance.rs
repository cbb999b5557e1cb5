// src/pipeline/enhance.rs
//
// Plate-oriented image enhancement ahead of the recognition call:
// grayscale, CLAHE contrast, sharpening, brightness normalization.

use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgcodecs, imgproc,
    prelude::*,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Enhance an artifact image and save the result into `enhanced_dir`
/// as `enhanced_{filename}`. Returns the enhanced file path.
pub fn enhance_and_save(src: &Path, enhanced_dir: &Path) -> Result<PathBuf> {
    let src_str = src.to_str().context("Image path is not valid UTF-8")?;
    let img = imgcodecs::imread(src_str, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        bail!("Could not load image {}", src.display());
    }

    let enhanced = enhance(&img)?;

    let filename = src
        .file_name()
        .context("Image path has no filename")?
        .to_string_lossy();
    let out_path = enhanced_dir.join(format!("enhanced_{}", filename));
    let out_str = out_path.to_str().context("Output path is not valid UTF-8")?;
    if !imgcodecs::imwrite(out_str, &enhanced, &core::Vector::new())? {
        bail!("Failed to write {}", out_path.display());
    }

    debug!("Enhanced image saved: {}", out_path.display());
    Ok(out_path)
}

fn enhance(img: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color(img, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

    // Contrast: CLAHE
    let mut clahe = imgproc::create_clahe(3.0, core::Size::new(8, 8))?;
    let mut contrasted = Mat::default();
    clahe.apply(&gray, &mut contrasted)?;

    // Sharpen
    let kernel = Mat::from_slice_2d(&[
        [-1.0f32, -1.0, -1.0],
        [-1.0, 9.0, -1.0],
        [-1.0, -1.0, -1.0],
    ])?;
    let mut sharpened = Mat::default();
    imgproc::filter_2d(
        &contrasted,
        &mut sharpened,
        -1,
        &kernel,
        core::Point::new(-1, -1),
        0.0,
        core::BORDER_DEFAULT,
    )?;

    // Brightness normalization (histogram stretch)
    let mut normalized = Mat::default();
    core::normalize(
        &sharpened,
        &mut normalized,
        0.0,
        255.0,
        core::NORM_MINMAX,
        -1,
        &core::no_array(),
    )?;

    Ok(normalized)
}
