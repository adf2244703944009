use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Temperatures below this are treated as zero and force greedy argmax.
const GREEDY_EPSILON: f32 = 1e-7;

/// Decoding configuration for one model.
///
/// `top_k == 0` disables top-k filtering, `top_p` outside (0, 1) disables
/// nucleus filtering, and `repetition_penalty == 1.0` disables the penalty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            repetition_penalty: 1.1,
        }
    }
}

impl SamplingParams {
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Self::default()
        }
    }
}

/// Selects the next token id from a logit vector.
///
/// `history` is the set of ids already emitted in the current generation
/// call; it only feeds the repetition penalty. The input slice is never
/// mutated: shaping happens on a private copy.
pub fn sample(
    logits: &[f32],
    history: &[u32],
    params: &SamplingParams,
    rng: &mut dyn rand::RngCore,
) -> u32 {
    debug_assert!(!logits.is_empty());
    let mut shaped = logits.to_vec();

    // Repetition penalty from the CTRL paper: positive logits shrink,
    // non-positive logits are pushed further down.
    if params.repetition_penalty != 1.0 && !history.is_empty() {
        let mut seen = HashSet::new();
        for &id in history {
            let idx = id as usize;
            if idx < shaped.len() && seen.insert(id) {
                if shaped[idx] > 0.0 {
                    shaped[idx] /= params.repetition_penalty;
                } else {
                    shaped[idx] *= params.repetition_penalty;
                }
            }
        }
    }

    if params.temperature < GREEDY_EPSILON {
        return argmax(&shaped);
    }

    for logit in shaped.iter_mut() {
        *logit /= params.temperature;
    }

    if params.top_k > 0 && params.top_k < shaped.len() {
        // Everything strictly below the k-th largest logit is masked out.
        // Ties at the threshold survive, which can keep more than k ids.
        let mut ordered = shaped.clone();
        ordered.sort_unstable_by(|a, b| b.total_cmp(a));
        let threshold = ordered[params.top_k - 1];
        for logit in shaped.iter_mut() {
            if *logit < threshold {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    if params.top_p > 0.0 && params.top_p < 1.0 {
        let probs = softmax(&shaped);
        let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
        order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));

        let mut kept = vec![false; shaped.len()];
        let mut mass = 0.0f32;
        for &idx in &order {
            kept[idx] = true;
            mass += probs[idx];
            if mass >= params.top_p {
                break;
            }
        }
        for (idx, logit) in shaped.iter_mut().enumerate() {
            if !kept[idx] {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    let probs = softmax(&shaped);
    let draw: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for (idx, &p) in probs.iter().enumerate() {
        cumulative += p;
        if draw < cumulative {
            return idx as u32;
        }
    }

    // Floating error can leave the cumulative walk short of the draw.
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .map(|idx| idx as u32)
        .unwrap_or(0)
}

/// First-occurrence argmax: the lowest index wins ties.
fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0usize;
    for (idx, &logit) in logits.iter().enumerate().skip(1) {
        if logit > logits[best] {
            best = idx;
        }
    }
    best as u32
}

/// Numerically stable softmax. `-inf` entries contribute zero; if every
/// entry is `-inf` the output is all zeros.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| {
            if l == f32::NEG_INFINITY {
                0.0
            } else {
                (l - max).exp()
            }
        })
        .collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
