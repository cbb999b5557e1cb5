// src/annotate.rs
//
// Frame annotation for the published stream: track boxes with identity
// badges, running no-helmet counts, ROI overlay, info line, timestamp.

use crate::roi::RoiPolygon;
use crate::tracker::Track;
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

const COLOR_VEHICLE: (f64, f64, f64) = (0.0, 255.0, 0.0); // green
const COLOR_VIOLATION: (f64, f64, f64) = (0.0, 165.0, 255.0); // orange
const COLOR_ROI: (f64, f64, f64) = (0.0, 255.0, 255.0); // yellow

fn scalar((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

pub fn draw_track(frame: &mut Mat, track: &Track, no_helmet_count: u32) -> Result<()> {
    let width = frame.cols();
    let height = frame.rows();

    let x1 = (track.bbox[0].max(0.0) as i32).min(width);
    let y1 = (track.bbox[1].max(0.0) as i32).min(height);
    let x2 = (track.bbox[2].max(0.0) as i32).min(width);
    let y2 = (track.bbox[3].max(0.0) as i32).min(height);
    if x2 <= x1 || y2 <= y1 {
        return Ok(());
    }

    let color = if no_helmet_count > 0 {
        scalar(COLOR_VIOLATION)
    } else {
        scalar(COLOR_VEHICLE)
    };

    imgproc::rectangle(
        frame,
        Rect::new(x1, y1, x2 - x1, y2 - y1),
        color,
        2,
        imgproc::LINE_8,
        0,
    )?;

    let label = if no_helmet_count > 0 {
        format!("vehicle #{}: {:.2} | no-helmet x{}", track.id, track.last_confidence, no_helmet_count)
    } else {
        format!("vehicle #{}: {:.2}", track.id, track.last_confidence)
    };

    let mut baseline = 0;
    let text_size = imgproc::get_text_size(&label, imgproc::FONT_HERSHEY_SIMPLEX, 0.6, 2, &mut baseline)?;
    imgproc::rectangle(
        frame,
        Rect::new(
            x1,
            (y1 - text_size.height - 10).max(0),
            text_size.width,
            text_size.height + 10,
        ),
        color,
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        frame,
        &label,
        Point::new(x1, (y1 - 5).max(text_size.height)),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}

pub fn draw_roi(frame: &mut Mat, roi: &RoiPolygon) -> Result<()> {
    let points = roi.points();
    for i in 0..points.len() {
        let (x1, y1) = points[i];
        let (x2, y2) = points[(i + 1) % points.len()];
        imgproc::line(
            frame,
            Point::new(x1 as i32, y1 as i32),
            Point::new(x2 as i32, y2 as i32),
            scalar(COLOR_ROI),
            2,
            imgproc::LINE_AA,
            0,
        )?;
    }
    Ok(())
}

/// One-line status overlay at the top of the frame.
pub fn draw_info_line(frame: &mut Mat, text: &str) -> Result<()> {
    imgproc::rectangle(
        frame,
        Rect::new(5, 5, 620, 30),
        Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        frame,
        text,
        Point::new(10, 27),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.55,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

pub fn draw_timestamp(frame: &mut Mat) -> Result<()> {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let y = frame.rows() - 10;
    imgproc::put_text(
        frame,
        &timestamp,
        Point::new(10, y.max(20)),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// JPEG-encode an annotated frame for publication.
pub fn encode_jpeg(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = core::Vector::from_slice(&[opencv::imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf = core::Vector::<u8>::new();
    opencv::imgcodecs::imencode(".jpg", frame, &mut buf, &params)?;
    Ok(buf.to_vec())
}
