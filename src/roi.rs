// src/roi.rs
//
// Region-of-interest polygon gating. Detections whose center falls
// outside the polygon are discarded before tracking.

use crate::types::Detection;

#[derive(Debug, Clone)]
pub struct RoiPolygon {
    points: Vec<(f32, f32)>,
}

impl RoiPolygon {
    /// A polygon needs at least 3 vertices.
    pub fn new(points: Vec<(f32, f32)>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Ray-casting point-in-polygon test. Boundary points count as inside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.points[i];
            let (xj, yj) = self.points[j];
            if (yi > y) != (yj > y) {
                let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
                if x < x_cross {
                    inside = !inside;
                } else if (x - x_cross).abs() < f32::EPSILON {
                    return true;
                }
            }
            j = i;
        }
        inside
    }

    pub fn contains_detection(&self, det: &Detection) -> bool {
        let (cx, cy) = det.center();
        self.contains(cx, cy)
    }
}

/// Drop detections whose center lies outside the polygon. With no ROI
/// configured, everything passes.
pub fn filter_detections(detections: Vec<Detection>, roi: Option<&RoiPolygon>) -> Vec<Detection> {
    match roi {
        Some(poly) => detections
            .into_iter()
            .filter(|d| poly.contains_detection(d))
            .collect(),
        None => detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det_at(cx: f32, cy: f32) -> Detection {
        Detection {
            bbox: [cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0],
            confidence: 0.8,
            class_id: 0,
            class_name: "vehicle".to_string(),
        }
    }

    fn square() -> RoiPolygon {
        RoiPolygon::new(vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]).unwrap()
    }

    #[test]
    fn test_requires_three_points() {
        assert!(RoiPolygon::new(vec![(0.0, 0.0), (1.0, 1.0)]).is_none());
        assert!(RoiPolygon::new(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]).is_some());
    }

    #[test]
    fn test_contains() {
        let roi = square();
        assert!(roi.contains(50.0, 50.0));
        assert!(!roi.contains(150.0, 50.0));
        assert!(!roi.contains(50.0, -10.0));
    }

    #[test]
    fn test_filter_by_center() {
        let roi = square();
        let dets = vec![det_at(50.0, 50.0), det_at(200.0, 50.0)];
        let kept = filter_detections(dets, Some(&roi));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].center(), (50.0, 50.0));
    }

    #[test]
    fn test_no_roi_passes_everything() {
        let dets = vec![det_at(50.0, 50.0), det_at(5000.0, 5000.0)];
        assert_eq!(filter_detections(dets, None).len(), 2);
    }
}
