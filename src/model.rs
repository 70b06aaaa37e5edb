//! Language-model access for sampling and scoring
//!
//! The pipeline only talks to [`LanguageModel`]: sample continuations for a
//! batch of prompts and score whole sequences. [`CausalLm`] implements it on
//! top of a candle decoder, a HuggingFace tokenizer and a seeded sampler;
//! tests substitute deterministic fakes.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::collections::HashMap;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::forward_llama::LlamaDecoder;
use crate::kv_cache::KvCache;
use crate::prompts::{ChatFormat, PromptStyle};
use crate::sampling::{GenerationParams, Sampler};

/// Supported decoder families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    /// LLaMA 2/3, SmolLM2 and other `LlamaForCausalLM` checkpoints
    Llama,
    /// Qwen2 / Qwen2.5
    Qwen2,
}

impl ModelArchitecture {
    /// Detect architecture from model ID
    pub fn from_model_id(model_id: &str) -> Self {
        let model_lower = model_id.to_lowercase();
        if model_lower.contains("qwen") {
            ModelArchitecture::Qwen2
        } else {
            if !(model_lower.contains("llama") || model_lower.contains("smollm")) {
                info!(
                    "Unknown model architecture for '{}', defaulting to LLaMA",
                    model_id
                );
            }
            ModelArchitecture::Llama
        }
    }
}

/// Decoder forward passes needed for sampling and scoring
pub trait DecoderBackend {
    fn n_layers(&self) -> usize;
    fn vocab_size(&self) -> usize;

    /// Logits for every position: `[1, seq_len, vocab]`
    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor>;

    /// Append `input_ids` to the cache and return last-position logits `[1, vocab]`
    fn forward_step(&self, input_ids: &Tensor, cache: &mut KvCache) -> Result<Tensor>;

    fn new_kv_cache(&self) -> KvCache {
        KvCache::new(self.n_layers())
    }
}

/// External model interface used by the collector and the evaluators
pub trait LanguageModel {
    fn model_id(&self) -> &str;

    /// Chat markup of the model, if it has one
    fn chat_format(&self) -> Option<ChatFormat>;

    /// Sample `params.num_generations` continuations for every prompt.
    ///
    /// `seed` is applied once at the start of the call; prompts of one call
    /// share the random stream.
    fn generate(
        &self,
        prompts: &[String],
        params: &GenerationParams,
        seed: u64,
    ) -> Result<Vec<Vec<String>>>;

    /// Mean per-token log-probability of each text, optionally with
    /// bag-of-words correction
    fn sequence_score(&self, texts: &[String], bow_correction: bool) -> Result<Vec<f64>>;
}

/// Resolve the prompt style for a model, failing when chat mode is impossible
pub fn prompt_style(model: &dyn LanguageModel, instruct: bool) -> Result<PromptStyle> {
    if !instruct {
        return Ok(PromptStyle::Dialogue);
    }
    match model.chat_format() {
        Some(format) => Ok(PromptStyle::Chat(format)),
        None => Err(PipelineError::MissingChatFormat {
            model_id: model.model_id().to_string(),
        }
        .into()),
    }
}

/// Tokens that end a sampled continuation
const STOP_TOKENS: &[&str] = &[
    "<|im_end|>",
    "<|eot_id|>",
    "<|end_of_text|>",
    "<|endoftext|>",
    "</s>",
    "<end_of_turn>",
];

/// Ids of the stop tokens a vocabulary defines
pub fn stop_token_ids(vocab: &HashMap<String, u32>) -> Vec<u32> {
    STOP_TOKENS
        .iter()
        .filter_map(|t| vocab.get(*t).copied())
        .collect()
}

/// Mark vocabulary entries that begin a word (`Ġ` byte-level BPE or `▁` SentencePiece)
pub fn bow_token_mask(vocab: &HashMap<String, u32>, size: usize) -> Vec<bool> {
    let size = vocab
        .values()
        .map(|&id| id as usize + 1)
        .max()
        .unwrap_or(0)
        .max(size);
    let mut mask = vec![false; size];
    for (token, &id) in vocab {
        if token.starts_with('Ġ') || token.starts_with('▁') {
            mask[id as usize] = true;
        }
    }
    mask
}

/// Mean of bag-of-words-corrected token log-probabilities.
///
/// `ids` is the full sequence; `token_lp[j]` is the log-probability of
/// `ids[j + 1]`; `bow_mass[p]` is the log total mass of word-initial tokens
/// predicted at row `p` (so `bow_mass` has `ids.len()` entries). A token that
/// starts a word pays for the word boundary before it; a token that ends a
/// word (next token word-initial, or end of sequence) is credited with the
/// boundary after it.
pub fn bow_corrected_mean(
    ids: &[u32],
    token_lp: &[f32],
    bow_mass: &[f32],
    is_bow: impl Fn(u32) -> bool,
) -> f64 {
    let n = token_lp.len();
    if n == 0 {
        return f64::NAN;
    }
    let mut total = 0.0f64;
    for j in 0..n {
        let mut lp = f64::from(token_lp[j]);
        if is_bow(ids[j + 1]) {
            lp -= f64::from(bow_mass[j]);
        }
        let ends_word = j + 1 == n || is_bow(ids[j + 2]);
        if ends_word {
            lp += f64::from(bow_mass[j + 1]);
        }
        total += lp;
    }
    total / n as f64
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64
}

fn logits_to_vec(logits: &Tensor) -> Result<Vec<f32>> {
    Ok(logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?)
}

/// Word-initial token table for bag-of-words correction
struct BowTable {
    ids: Tensor,
    mask: Vec<bool>,
}

impl BowTable {
    fn is_bow(&self, id: u32) -> bool {
        self.mask.get(id as usize).copied().unwrap_or(false)
    }
}

/// Candle-backed causal language model
pub struct CausalLm {
    backend: Box<dyn DecoderBackend>,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    chat_format: Option<ChatFormat>,
    stop_tokens: Vec<u32>,
    bow: Option<BowTable>,
}

impl CausalLm {
    /// Download (or reuse the hub cache of) a model and load it on `device`
    pub fn from_pretrained(model_id: &str, device: Device) -> Result<Self> {
        let architecture = ModelArchitecture::from_model_id(model_id);
        // Half precision only on CUDA; CPU and Metal run in F32
        let dtype = if device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };

        info!("Loading model: {}", model_id);
        info!("Architecture: {:?}", architecture);
        info!("Device: {:?}", device);
        info!("Dtype: {:?}", dtype);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;

        let backend = LlamaDecoder::load(&repo, architecture, &device, dtype)?;
        Self::new(Box::new(backend), tokenizer, device, model_id)
    }

    /// Assemble a model from a loaded decoder and its tokenizer.
    ///
    /// Stop tokens, chat format and the word-initial table are read from the
    /// tokenizer's vocabulary, special tokens included.
    pub(crate) fn new(
        backend: Box<dyn DecoderBackend>,
        tokenizer: Tokenizer,
        device: Device,
        model_id: &str,
    ) -> Result<Self> {
        let vocab = tokenizer.get_vocab(true);
        let chat_format = ChatFormat::detect(|t| vocab.contains_key(t));
        let stop_tokens = stop_token_ids(&vocab);

        let mask = bow_token_mask(&vocab, backend.vocab_size());
        let bow_ids: Vec<u32> = mask
            .iter()
            .enumerate()
            .filter(|(_, is_bow)| **is_bow)
            .map(|(id, _)| id as u32)
            .collect();
        let bow = if bow_ids.is_empty() {
            warn!("Tokenizer has no word-initial markers; bag-of-words correction disabled");
            None
        } else {
            Some(BowTable {
                ids: Tensor::new(bow_ids.as_slice(), &device)?,
                mask,
            })
        };

        info!(
            "Chat format: {}, stop tokens: {:?}",
            chat_format.map_or_else(|| "none".to_string(), |f| f.to_string()),
            stop_tokens
        );

        Ok(Self {
            backend,
            tokenizer,
            device,
            model_id: model_id.to_string(),
            chat_format,
            stop_tokens,
            bow,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("Decode error: {e}"))
    }

    /// Sample continuations for one prompt, prefilling the prompt once
    fn sample_prompt(
        &self,
        prompt: &str,
        params: &GenerationParams,
        sampler: &mut Sampler,
    ) -> Result<Vec<String>> {
        let prompt_ids = self.encode(prompt)?;
        if prompt_ids.is_empty() {
            anyhow::bail!("Prompt encodes to zero tokens: {prompt:?}");
        }

        let mut prefilled = self.backend.new_kv_cache();
        let input = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let prompt_logits = logits_to_vec(&self.backend.forward_step(&input, &mut prefilled)?)?;

        let mut continuations = Vec::with_capacity(params.num_generations);
        for _ in 0..params.num_generations {
            let mut cache = prefilled.clone();
            let mut context = prompt_ids.clone();
            let mut logits = prompt_logits.clone();
            let mut generated = Vec::with_capacity(params.max_new_tokens);

            for step in 0..params.max_new_tokens {
                let next = sampler.sample(&logits, &context)?;
                if self.stop_tokens.contains(&next) {
                    break;
                }
                generated.push(next);
                context.push(next);
                if step + 1 == params.max_new_tokens {
                    break;
                }
                let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
                logits = logits_to_vec(&self.backend.forward_step(&input, &mut cache)?)?;
            }

            continuations.push(self.decode(&generated)?);
        }
        Ok(continuations)
    }

    fn score_one(&self, text: &str, bow_correction: bool) -> Result<f64> {
        let ids = self.encode(text)?;
        if ids.len() < 2 {
            warn!("Sequence too short to score ({} tokens): {text:?}", ids.len());
            return Ok(f64::NAN);
        }
        let n = ids.len();

        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self
            .backend
            .forward_logits(&input)?
            .squeeze(0)?
            .to_dtype(DType::F32)?;
        let logprobs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;

        let targets = Tensor::new(&ids[1..], &self.device)?.unsqueeze(1)?;
        let token_lp: Vec<f32> = logprobs
            .narrow(0, 0, n - 1)?
            .contiguous()?
            .gather(&targets, 1)?
            .squeeze(1)?
            .to_vec1()?;

        match (&self.bow, bow_correction) {
            (Some(bow), true) => {
                let bow_mass: Vec<f32> = logprobs
                    .index_select(&bow.ids, 1)?
                    .log_sum_exp(1)?
                    .to_vec1()?;
                Ok(bow_corrected_mean(&ids, &token_lp, &bow_mass, |id| {
                    bow.is_bow(id)
                }))
            }
            _ => Ok(mean(&token_lp)),
        }
    }
}

impl LanguageModel for CausalLm {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn chat_format(&self) -> Option<ChatFormat> {
        self.chat_format
    }

    fn generate(
        &self,
        prompts: &[String],
        params: &GenerationParams,
        seed: u64,
    ) -> Result<Vec<Vec<String>>> {
        if prompts.is_empty() {
            return Err(PipelineError::EmptyBatch {
                operation: "generate",
            }
            .into());
        }
        let mut sampler = Sampler::new(seed, params);
        prompts
            .iter()
            .map(|prompt| self.sample_prompt(prompt, params, &mut sampler))
            .collect()
    }

    fn sequence_score(&self, texts: &[String], bow_correction: bool) -> Result<Vec<f64>> {
        if texts.is_empty() {
            return Err(PipelineError::EmptyBatch {
                operation: "sequence_score",
            }
            .into());
        }
        let scores = texts
            .iter()
            .map(|text| self.score_one(text, bow_correction))
            .collect::<Result<Vec<_>>>()?;
        debug!("Scored {} sequences", scores.len());
        Ok(scores)
    }
}
