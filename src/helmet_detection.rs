// src/helmet_detection.rs
//
// Helmet-state detector over cropped vehicle regions. Reuses the YOLO
// decode path; what matters downstream is only the top result, which the
// violation accumulator turns into an inspection outcome.

use crate::config::{Config, ViolationConfig};
use crate::types::Detection;
use crate::vehicle_detection::YoloDetector;
use crate::violation::InspectionOutcome;
use anyhow::Result;
use opencv::core::Mat;

pub struct HelmetDetector {
    detector: YoloDetector,
    violation: ViolationConfig,
}

impl HelmetDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let detector = YoloDetector::new(
            &config.model.helmet_model_path,
            config.model.helmet_class_names.clone(),
            &config.model,
            &config.inference,
            config.detection.nms_iou_threshold,
        )?;
        Ok(Self {
            detector,
            violation: config.violation.clone(),
        })
    }

    /// Run the helmet model on a vehicle crop and reduce the result to an
    /// inspection outcome. A detector error is reported as inconclusive
    /// by the caller; this method only errors on the call itself.
    pub fn inspect(&mut self, crop: &Mat, confidence_threshold: f32) -> Result<InspectionOutcome> {
        let detections = self.detector.detect(crop, confidence_threshold, None)?;
        Ok(self.classify(&detections))
    }

    fn classify(&self, detections: &[Detection]) -> InspectionOutcome {
        let top = detections.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match top {
            Some(det)
                if det.confidence >= self.violation.no_helmet_confidence
                    && self.is_no_helmet_class(&det.class_name) =>
            {
                InspectionOutcome::NoHelmet {
                    confidence: det.confidence,
                }
            }
            _ => InspectionOutcome::HelmetOrClear,
        }
    }

    fn is_no_helmet_class(&self, class_name: &str) -> bool {
        let lower = class_name.to_lowercase();
        self.violation
            .no_helmet_classes
            .iter()
            .any(|c| lower == c.to_lowercase())
    }
}
