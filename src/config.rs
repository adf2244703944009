use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sampler::SamplingParams;

/// Static configuration for one model. Supplied externally; this crate
/// ships only the in-code default layout below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub weights_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub system_prompt: String,
    pub sampling: SamplingParams,
    pub max_tokens: usize,
}

/// The router's model catalog plus eviction knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub models: HashMap<String, ModelConfig>,
    /// Names exempt from eviction. Includes keys for collaborators that are
    /// never pooled here (the transcription model) so operators can reuse
    /// the same allow-list everywhere.
    pub persistent: HashSet<String>,
    /// Idle time after which a non-persistent session is evicted.
    pub ttl: Duration,
    /// Sweep interval of the background eviction task.
    pub tick: Duration,
}

impl Catalog {
    /// The five-model layout of the assistant: a fast default, a
    /// long-context model, the action model, and the vision/code
    /// specialists. Weights are expected under `models_dir`.
    pub fn default_layout(models_dir: impl Into<PathBuf>) -> Self {
        let models_dir = models_dir.into();
        let entry = |file: &str, prompt: &str, sampling: SamplingParams, max_tokens: usize| {
            ModelConfig {
                weights_path: models_dir.join(file),
                tokenizer_path: Some(models_dir.join("vocab.json")),
                system_prompt: prompt.to_string(),
                sampling,
                max_tokens,
            }
        };

        let mut models = HashMap::new();
        models.insert(
            "phi".to_string(),
            entry(
                "tinyllama-1.1b-chat.Q4_K_M.gguf",
                "Voce e um assistente rapido e direto. Responda em uma frase.",
                SamplingParams::default(),
                128,
            ),
        );
        models.insert(
            "llama".to_string(),
            entry(
                "llama-3.2-3b-instruct.Q4_K_M.gguf",
                "Voce e um assistente que analisa documentos e contexto longo.",
                SamplingParams::default(),
                512,
            ),
        );
        models.insert(
            "qwen".to_string(),
            entry(
                "qwen2.5-7b-instruct.Q4_K_M.gguf",
                "Responda apenas com um objeto JSON no formato \
                 {\"action\": \"...\", \"params\": {...}}. Nada alem do JSON.",
                SamplingParams {
                    temperature: 0.1,
                    ..SamplingParams::default()
                },
                128,
            ),
        );
        models.insert(
            "vision".to_string(),
            entry(
                "llava-v1.6-7b.Q4_K_M.gguf",
                "Descreva o que aparece na tela do usuario.",
                SamplingParams::default(),
                256,
            ),
        );
        models.insert(
            "coder".to_string(),
            entry(
                "qwen2.5-coder-7b.Q4_K_M.gguf",
                "Voce e um especialista em programacao. Explique e gere codigo.",
                SamplingParams {
                    temperature: 0.2,
                    ..SamplingParams::default()
                },
                512,
            ),
        );

        Self {
            models,
            persistent: HashSet::from(["phi".to_string(), "whisper".to_string()]),
            ttl: Duration::from_secs(300),
            tick: Duration::from_secs(30),
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }
}

/// Model family implemented by the GGUF runtime backend, inferred from the
/// weights filename the same way the catalog infers it on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Llama,
    Qwen,
    Unknown,
}

pub fn infer_family_from_path(path: &Path) -> ModelFamily {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if stem.contains("qwen") {
        ModelFamily::Qwen
    } else if stem.contains("llama") {
        ModelFamily::Llama
    } else {
        ModelFamily::Unknown
    }
}
