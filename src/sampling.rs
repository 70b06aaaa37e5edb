//! Seeded token sampling with repetition penalty, temperature, top-k and top-p
//!
//! Processing order per step: repetition penalty, temperature, top-k, top-p,
//! then a draw from the renormalised distribution. A non-positive temperature
//! selects the argmax after the repetition penalty.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Seed applied at the start of every generation batch
pub const DEFAULT_SEED: u64 = 1024;

/// Decoding parameters for sampled generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Continuations sampled per prompt
    pub num_generations: usize,
    /// Maximum new tokens per continuation
    pub max_new_tokens: usize,
    /// Nucleus mass; `None` disables top-p filtering
    pub top_p: Option<f64>,
    /// Keep only the k most likely tokens; 0 disables top-k filtering
    pub top_k: usize,
    pub temperature: f64,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            num_generations: 10,
            max_new_tokens: 20,
            top_p: None,
            top_k: 0,
            temperature: 1.0,
            repetition_penalty: 1.2,
        }
    }
}

/// Stateful sampler; one instance per seeded batch
pub struct Sampler {
    rng: StdRng,
    top_p: Option<f64>,
    top_k: usize,
    temperature: f64,
    repetition_penalty: f32,
}

impl Sampler {
    pub fn new(seed: u64, params: &GenerationParams) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            top_p: params.top_p,
            top_k: params.top_k,
            temperature: params.temperature,
            repetition_penalty: params.repetition_penalty,
        }
    }

    /// Draw the next token given next-token logits and the ids seen so far
    pub fn sample(&mut self, logits: &[f32], context: &[u32]) -> Result<u32> {
        if logits.is_empty() {
            anyhow::bail!("Empty logits");
        }

        let mut scores = logits.to_vec();
        apply_repetition_penalty(&mut scores, context, self.repetition_penalty);

        if self.temperature <= 0.0 {
            return argmax(&scores);
        }

        let temperature = self.temperature as f32;
        let mut candidates: Vec<(u32, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .map(|(idx, &s)| (idx as u32, s / temperature))
            .collect();
        if candidates.is_empty() {
            anyhow::bail!("No finite logits to sample from");
        }
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if self.top_k > 0 && self.top_k < candidates.len() {
            candidates.truncate(self.top_k);
        }

        let mut probs = softmax(&candidates);

        if let Some(top_p) = self.top_p {
            if top_p < 1.0 {
                let mut cumsum = 0.0;
                let mut keep = probs.len();
                for (i, &p) in probs.iter().enumerate() {
                    cumsum += f64::from(p);
                    if cumsum >= top_p {
                        keep = i + 1;
                        break;
                    }
                }
                candidates.truncate(keep);
                probs.truncate(keep);
                let total: f32 = probs.iter().sum();
                for p in &mut probs {
                    *p /= total;
                }
            }
        }

        let r: f32 = self.rng.gen();
        let mut cumsum = 0.0;
        for (&(token, _), &p) in candidates.iter().zip(probs.iter()) {
            cumsum += p;
            if r < cumsum {
                return Ok(token);
            }
        }

        // rounding left r above the final cumulative mass
        Ok(candidates[candidates.len() - 1].0)
    }
}

/// Divide positive and multiply negative logits of already-seen tokens
fn apply_repetition_penalty(scores: &mut [f32], context: &[u32], penalty: f32) {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return;
    }
    let mut seen = std::collections::HashSet::new();
    for &token in context {
        if !seen.insert(token) {
            continue;
        }
        if let Some(score) = scores.get_mut(token as usize) {
            *score = if *score > 0.0 {
                *score / penalty
            } else {
                *score * penalty
            };
        }
    }
}

fn argmax(scores: &[f32]) -> Result<u32> {
    let (max_idx, _) = scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| anyhow::anyhow!("Empty logits"))?;
    Ok(max_idx as u32)
}

fn softmax(candidates: &[(u32, f32)]) -> Vec<f32> {
    let max_val = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = candidates.iter().map(|(_, s)| (s - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}
