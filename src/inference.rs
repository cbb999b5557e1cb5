// src/inference.rs
//
// Shared ONNX Runtime session wrapper for both detectors. Device
// selection happens once at load time: CUDA first, plain CPU when the
// accelerated build fails. A failed accelerated load must never abort
// stream start.

use crate::config::InferenceConfig;
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{info, warn};

pub struct DetectorSession {
    session: Session,
}

impl DetectorSession {
    pub fn load(model_path: &str, config: &InferenceConfig) -> Result<Self> {
        info!("Loading model: {}", model_path);

        let session = if config.use_cuda {
            match Self::build(model_path, config, true) {
                Ok(session) => {
                    info!("✓ Model loaded on CUDA device {}", config.device_id);
                    session
                }
                Err(e) => {
                    warn!("CUDA load failed ({}), falling back to CPU", e);
                    Self::build(model_path, config, false)?
                }
            }
        } else {
            Self::build(model_path, config, false)?
        };

        Ok(Self { session })
    }

    fn build(model_path: &str, config: &InferenceConfig, cuda: bool) -> Result<Session> {
        let mut builder = Session::builder()?;

        if cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build()])?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path))?;

        Ok(session)
    }

    /// Run the model on a CHW float input. Returns the raw output tensor
    /// and its shape.
    pub fn run(&mut self, input: &[f32], input_size: usize) -> Result<(Vec<i64>, Vec<f32>)> {
        let shape = [1_i64, 3, input_size as i64, input_size as i64];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (output_shape, data) = output.try_extract_tensor::<f32>()?;

        Ok((output_shape.to_vec(), data.to_vec()))
    }
}
