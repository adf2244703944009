use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::backend::InferenceBackend;
use crate::config::ModelConfig;
use crate::error::RouterError;
use crate::protocol::ActionDescriptor;
use crate::sampler::{self, SamplingParams};
use crate::tokenizer::Tokenizer;

/// Cooperative cancellation for a generation loop: a shared flag plus an
/// optional deadline, checked at the top of every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A loaded, ready-to-run model: exclusive backend handle, tokenizer,
/// sampling configuration and the per-call generation state.
///
/// The router serializes access through a per-session mutex, so a session
/// never sees two concurrent `generate` calls.
pub struct ModelSession {
    name: String,
    backend: Box<dyn InferenceBackend>,
    tokenizer: Tokenizer,
    params: SamplingParams,
    /// Ids emitted by the current `generate` call. Reset at call start; it
    /// is not cross-call memory, it only feeds the repetition penalty.
    state: Vec<u32>,
    system_prompt: String,
    max_tokens: usize,
    rng: StdRng,
}

impl ModelSession {
    pub fn new(
        name: impl Into<String>,
        backend: Box<dyn InferenceBackend>,
        tokenizer: Tokenizer,
        config: &ModelConfig,
    ) -> Self {
        let name = name.into();
        let seed = 299_792_458u64
            .wrapping_add(name.bytes().map(u64::from).sum::<u64>());
        Self {
            name,
            backend,
            tokenizer,
            params: config.sampling,
            state: Vec::new(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime override of the decoding configuration.
    pub fn set_sampling(&mut self, params: SamplingParams) {
        self.params = params;
    }

    pub fn sampling(&self) -> SamplingParams {
        self.params
    }

    /// Autoregressive generation over the encoded prompt. Stops on the
    /// end-of-sequence id or after the configured token budget, and aborts
    /// with [`RouterError::Cancelled`] as soon as the token fires.
    pub fn generate(&mut self, prompt: &str, cancel: &CancelToken) -> Result<String, RouterError> {
        self.state.clear();

        let full_prompt = if self.system_prompt.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n{}", self.system_prompt, prompt)
        };
        let (mut tokens, mut mask) = self.tokenizer.encode(&full_prompt);
        debug!(model = %self.name, prompt_tokens = tokens.len(), "generation start");

        let mut index_pos = 0usize;
        for _ in 0..self.max_tokens {
            if cancel.is_cancelled() {
                return Err(RouterError::Cancelled);
            }

            // First pass feeds the whole prompt; afterwards only the token
            // appended on the previous step.
            let context_size = if index_pos == 0 { tokens.len() } else { 1 };
            let start = tokens.len() - context_size;
            let logits = self
                .backend
                .forward(&tokens[start..], index_pos)
                .map_err(|e| RouterError::Inference {
                    model: self.name.clone(),
                    reason: e.to_string(),
                })?;
            index_pos += context_size;

            let next = sampler::sample(&logits, &self.state, &self.params, &mut self.rng);
            if next == self.tokenizer.eos_id() {
                break;
            }
            self.state.push(next);
            tokens.push(next);
            mask.push(1);
        }

        debug!(model = %self.name, generated = self.state.len(), "generation done");
        Ok(self.tokenizer.decode(&self.state))
    }

    /// Generation for the action model: runs [`Self::generate`] and parses
    /// the first balanced JSON object out of the output.
    pub fn generate_action(
        &mut self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<ActionDescriptor, RouterError> {
        let text = self.generate(prompt, cancel)?;
        let block = extract_json_block(&text).ok_or_else(|| RouterError::Inference {
            model: self.name.clone(),
            reason: format!("action output carries no JSON object: '{}'", text),
        })?;
        serde_json::from_str(block).map_err(|e| RouterError::Inference {
            model: self.name.clone(),
            reason: format!("malformed action descriptor: {}", e),
        })
    }
}

/// Returns the first balanced `{...}` block of `text`, if any.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
