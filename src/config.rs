// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub violation: ViolationConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vehicle_model_path: String,
    pub helmet_model_path: String,
    /// Square model input size (letterboxed)
    pub input_size: usize,
    /// Class indices the vehicle model treats as vehicles
    pub vehicle_classes: Vec<usize>,
    /// Output class names of the helmet model, by index
    pub helmet_class_names: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vehicle_model_path: "models/vehicle.onnx".to_string(),
            helmet_model_path: "models/helmet.onnx".to_string(),
            input_size: 640,
            vehicle_classes: vec![0],
            helmet_class_names: vec!["helmet".to_string(), "no_helmet".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub use_cuda: bool,
    pub device_id: i32,
    pub num_threads: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            use_cuda: true,
            device_id: 0,
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// Run detection every N displayed frames
    pub detection_interval_frames: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            nms_iou_threshold: 0.45,
            detection_interval_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum IoU to match a detection to an existing track
    pub min_iou: f32,
    /// Consecutive unmatched frames before a track is evicted
    pub max_missed_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_missed_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Minimum frames between helmet inspections of the same track
    pub reinspect_interval_frames: u64,
    /// Consecutive no-helmet inspections required to confirm
    pub confirm_threshold: u32,
    /// Frames after an emission before the same track may emit again
    pub cooldown_frames: u64,
    /// Minimum confidence for a no-helmet result to count
    pub no_helmet_confidence: f32,
    /// Class names counted as a no-helmet result
    pub no_helmet_classes: Vec<String>,
    /// Minimum crop size before a track is eligible for inspection
    pub min_crop_width: u32,
    pub min_crop_height: u32,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            reinspect_interval_frames: 15,
            confirm_threshold: 2,
            cooldown_frames: 90,
            no_helmet_confidence: 0.4,
            no_helmet_classes: vec!["no_helmet".to_string(), "without_helmet".to_string()],
            min_crop_width: 290,
            min_crop_height: 450,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Handoff directory watched by the enrichment pipeline
    pub output_dir: String,
    /// Padding around the track box, as a fraction of box size
    pub pad_ratio: f32,
    pub min_width: u32,
    pub min_height: u32,
    pub jpeg_quality: i32,
    /// Frames before the same identity may produce another artifact
    pub cooldown_frames: u64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            output_dir: "violation".to_string(),
            pad_ratio: 0.1,
            min_width: 290,
            min_height: 450,
            jpeg_quality: 85,
            cooldown_frames: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// "camera" or "video"
    pub source_type: String,
    /// Camera index or video file path
    pub source: String,
    pub target_fps: f64,
    pub save_annotated: bool,
    pub output_dir: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source_type: "camera".to_string(),
            source: "0".to_string(),
            target_fps: 30.0,
            save_annotated: false,
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub watch_dir: String,
    pub processed_dir: String,
    pub enhanced_dir: String,
    pub results_dir: String,
    pub poll_interval_secs: f64,
    pub worker_count: usize,
    /// Minimum width*height an artifact must have to be worth an OCR call
    pub min_resolution: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_dir: "violation".to_string(),
            processed_dir: "processed".to_string(),
            enhanced_dir: "enhanced".to_string(),
            results_dir: "results".to_string(),
            poll_interval_secs: 2.0,
            worker_count: 4,
            min_resolution: 200 * 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Backend model variants, tried in order
    pub models: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            models: vec![
                "gemini-2.0-flash".to_string(),
                "gemini-2.0-flash-001".to_string(),
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub api_url: String,
    pub storage_url: String,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub violation_type: String,
    pub location: String,
    pub camera_id: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5001".to_string(),
            storage_url: "http://localhost:5002".to_string(),
            max_retries: 3,
            initial_backoff_ms: 500,
            violation_type: "no_helmet".to_string(),
            location: String::new(),
            camera_id: "cam-01".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
