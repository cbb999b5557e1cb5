// src/vehicle_detection.rs
//
// YOLO-family object detector: letterbox preprocess, ONNX inference,
// postprocess (class filter + NMS) back to original image coordinates.
// The same decode path serves both model instantiations; only the class
// tables differ.

use crate::config::{InferenceConfig, ModelConfig};
use crate::inference::DetectorSession;
use crate::types::Detection;
use anyhow::Result;
use opencv::{core::Mat, imgproc, prelude::*};
use tracing::debug;

pub struct YoloDetector {
    session: DetectorSession,
    input_size: usize,
    class_names: Vec<String>,
    nms_iou: f32,
}

impl YoloDetector {
    pub fn new(
        model_path: &str,
        class_names: Vec<String>,
        model: &ModelConfig,
        inference: &InferenceConfig,
        nms_iou: f32,
    ) -> Result<Self> {
        let session = DetectorSession::load(model_path, inference)?;
        Ok(Self {
            session,
            input_size: model.input_size,
            class_names,
            nms_iou,
        })
    }

    /// Detect objects in a BGR frame. Malformed or empty input yields an
    /// empty result rather than an error.
    pub fn detect(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
        class_filter: Option<&[usize]>,
    ) -> Result<Vec<Detection>> {
        let width = frame.cols() as usize;
        let height = frame.rows() as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let rgb = bgr_mat_to_rgb_bytes(frame)?;
        let (input, scale, pad_x, pad_y) = self.preprocess(&rgb, width, height);
        let (shape, output) = self.session.run(&input, self.input_size)?;

        let detections = self.postprocess(
            &shape,
            &output,
            scale,
            pad_x,
            pad_y,
            confidence_threshold,
            class_filter,
        );

        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }

    fn preprocess(
        &self,
        src: &[u8],
        src_w: usize,
        src_h: usize,
    ) -> (Vec<f32>, f32, f32, f32) {
        let target = self.input_size;

        // Fit inside target x target preserving aspect ratio
        let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale) as usize).max(1);
        let scaled_h = ((src_h as f32 * scale) as usize).max(1);

        let pad_x = (target - scaled_w) as f32 / 2.0;
        let pad_y = (target - scaled_h) as f32 / 2.0;

        let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

        // Gray letterbox canvas
        let mut canvas = vec![114u8; target * target * 3];
        for y in 0..scaled_h {
            for x in 0..scaled_w {
                let src_idx = (y * scaled_w + x) * 3;
                let dst_x = x + pad_x as usize;
                let dst_y = y + pad_y as usize;
                let dst_idx = (dst_y * target + dst_x) * 3;
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
            }
        }

        // [0,255] HWC -> [0,1] CHW
        let mut input = vec![0.0f32; 3 * target * target];
        for c in 0..3 {
            for h in 0..target {
                for w in 0..target {
                    let hwc_idx = (h * target + w) * 3 + c;
                    let chw_idx = c * target * target + h * target + w;
                    input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
                }
            }
        }

        (input, scale, pad_x, pad_y)
    }

    #[allow(clippy::too_many_arguments)]
    fn postprocess(
        &self,
        shape: &[i64],
        output: &[f32],
        scale: f32,
        pad_x: f32,
        pad_y: f32,
        conf_thresh: f32,
        class_filter: Option<&[usize]>,
    ) -> Vec<Detection> {
        // Output layout [1, 4 + num_classes, num_anchors]
        if shape.len() != 3 || shape[1] < 5 {
            return Vec::new();
        }
        let num_classes = (shape[1] - 4) as usize;
        let num_anchors = shape[2] as usize;
        if output.len() < (4 + num_classes) * num_anchors {
            return Vec::new();
        }

        let mut detections = Vec::new();

        for i in 0..num_anchors {
            let cx = output[i];
            let cy = output[num_anchors + i];
            let w = output[num_anchors * 2 + i];
            let h = output[num_anchors * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0usize;
            for c in 0..num_classes {
                let conf = output[num_anchors * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < conf_thresh {
                continue;
            }
            if let Some(allowed) = class_filter {
                if !allowed.contains(&best_class) {
                    continue;
                }
            }

            // Center format -> corners, then undo the letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: max_conf,
                class_id: best_class,
                class_name: self.class_name(best_class),
            });
        }

        nms(detections, self.nms_iou)
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

fn bgr_mat_to_rgb_bytes(frame: &Mat) -> Result<Vec<u8>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    Ok(rgb.data_bytes()?.to_vec())
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| crate::tracker::iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }

    keep
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

    #[test]
    fn test_nms_suppresses_overlaps() {
        let dets = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.9),
            det(5.0, 5.0, 105.0, 105.0, 0.7),
            det(300.0, 300.0, 400.0, 400.0, 0.8),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resize_preserves_uniform_color() {
        let src = vec![200u8; 4 * 4 * 3];
        let out = resize_bilinear(&src, 4, 4, 8, 8);
        assert_eq!(out.len(), 8 * 8 * 3);
        assert!(out.iter().all(|&v| v == 200));
    }
}
