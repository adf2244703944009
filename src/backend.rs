use anyhow::{Error as E, Result};
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;
use tracing::info;

use crate::config::{infer_family_from_path, ModelConfig, ModelFamily};

/// Opaque handle to one model's inference engine.
///
/// The handle is exclusive: it is never shared across concurrent
/// generations, and dropping it releases the backend's memory.
pub trait InferenceBackend: Send {
    /// Runs one forward pass over `tokens` starting at `index_pos` and
    /// returns the logits for the next position.
    fn forward(&mut self, tokens: &[u32], index_pos: usize) -> Result<Vec<f32>>;
}

/// Construction seam for backends, so the router can be exercised without
/// real weights and alternative engines can be plugged in.
pub trait BackendLoader: Send + Sync {
    fn load(&self, name: &str, config: &ModelConfig) -> Result<Box<dyn InferenceBackend>>;
}

enum Weights {
    Llama(Box<quantized_llama::ModelWeights>),
    Qwen2(Box<quantized_qwen2::ModelWeights>),
}

/// GGUF-backed runtime model on candle.
pub struct GgufBackend {
    weights: Weights,
    device: Device,
}

impl GgufBackend {
    pub fn load_from_gguf(config: &ModelConfig, device: &Device) -> Result<Self> {
        let path = &config.weights_path;
        let mut file = std::fs::File::open(path)
            .map_err(|e| E::msg(format!("failed to open model file '{}': {}", path.display(), e)))?;
        let content = gguf_file::Content::read(&mut file)?;

        let weights = match infer_family_from_path(path) {
            ModelFamily::Llama => {
                let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)?;
                Weights::Llama(Box::new(model))
            }
            ModelFamily::Qwen => {
                let model = quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device)?;
                Weights::Qwen2(Box::new(model))
            }
            ModelFamily::Unknown => {
                return Err(E::msg(format!(
                    "no runtime backend for '{}': supported families are llama and qwen",
                    path.display()
                )))
            }
        };
        Ok(Self {
            weights,
            device: device.clone(),
        })
    }
}

impl InferenceBackend for GgufBackend {
    fn forward(&mut self, tokens: &[u32], index_pos: usize) -> Result<Vec<f32>> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = match &mut self.weights {
            Weights::Llama(model) => model.forward(&input, index_pos)?,
            Weights::Qwen2(model) => model.forward(&input, index_pos)?,
        };
        let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
        Ok(logits.to_vec1::<f32>()?)
    }
}

/// Loads [`GgufBackend`] sessions on a fixed device.
pub struct GgufLoader {
    device: Device,
}

impl Default for GgufLoader {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

impl BackendLoader for GgufLoader {
    fn load(&self, name: &str, config: &ModelConfig) -> Result<Box<dyn InferenceBackend>> {
        info!(model = name, path = %config.weights_path.display(), "loading GGUF weights");
        let backend = GgufBackend::load_from_gguf(config, &self.device)?;
        Ok(Box::new(backend))
    }
}
