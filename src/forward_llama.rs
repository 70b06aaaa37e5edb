//! LLaMA-family decoder forward pass
//!
//! Covers LLaMA 2/3, SmolLM2 and Qwen2 checkpoints, which share the same
//! pre-norm decoder block (RMSNorm, rotary attention with grouped KV heads,
//! SwiGLU MLP). Differences handled here:
//! - Qwen2 has bias on the Q/K/V projections (`attention_bias` elsewhere)
//! - SmolLM2 and small Qwen2 models tie `lm_head` to the input embeddings

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor, D};
use candle_nn::{embedding, linear_b, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use hf_hub::api::sync::ApiRepo;
use tracing::info;

use crate::kv_cache::{KvCache, LayerKv};
use crate::masks::decode_mask;
use crate::model::{DecoderBackend, ModelArchitecture};

/// Subset of the HuggingFace `config.json` the decoder needs
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DecoderConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub attention_bias: Option<bool>,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}

fn default_max_position_embeddings() -> usize {
    4096
}

impl DecoderConfig {
    fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    fn qkv_bias(&self, architecture: ModelArchitecture) -> bool {
        match architecture {
            ModelArchitecture::Qwen2 => true,
            ModelArchitecture::Llama => self.attention_bias.unwrap_or(false),
        }
    }
}

/// Rotary position embeddings in the half-split layout used by HF checkpoints
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(dim: usize, max_seq_len: usize, theta: f64, device: &Device, dtype: DType) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| (1.0 / theta.powf(i as f64 / dim as f64)) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq, device)?;
        let positions: Vec<f32> = (0..max_seq_len).map(|i| i as f32).collect();
        let positions = Tensor::new(positions, device)?;

        // [seq_len, dim/2] -> [seq_len, dim]
        let freqs = positions.unsqueeze(1)?.matmul(&inv_freq.unsqueeze(0)?)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;

        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor, start_pos: usize) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let cos = self.cos.i(start_pos..start_pos + seq_len)?;
        let sin = self.sin.i(start_pos..start_pos + seq_len)?;
        Ok((rotate(q, &cos, &sin)?, rotate(k, &cos, &sin)?))
    }
}

fn rotate(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let head_dim = x.dim(D::Minus1)?;
    let half = head_dim / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;
    let rotated = Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?;

    let cos = cos.unsqueeze(0)?.unsqueeze(0)?;
    let sin = sin.unsqueeze(0)?.unsqueeze(0)?;
    Ok((x.broadcast_mul(&cos)? + rotated.broadcast_mul(&sin)?)?)
}

fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    let x = x
        .unsqueeze(2)?
        .expand((b, num_kv_heads, n_rep, seq_len, head_dim))?;
    Ok(x.reshape((b, num_kv_heads * n_rep, seq_len, head_dim))?)
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &DecoderConfig, qkv_bias: bool) -> Result<Self> {
        let head_dim = config.head_dim();
        let kv_dim = config.num_kv_heads() * head_dim;
        let q_proj = linear_b(
            config.hidden_size,
            config.num_attention_heads * head_dim,
            qkv_bias,
            vb.pp("q_proj"),
        )?;
        let k_proj = linear_b(config.hidden_size, kv_dim, qkv_bias, vb.pp("k_proj"))?;
        let v_proj = linear_b(config.hidden_size, kv_dim, qkv_bias, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(
            config.num_attention_heads * head_dim,
            config.hidden_size,
            vb.pp("o_proj"),
        )?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.num_kv_heads(),
            head_dim,
        })
    }

    /// Attention over `x`; with a cache the new keys/values are appended and
    /// queries attend to every cached position as well.
    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        start_pos: usize,
        cache: Option<&mut LayerKv>,
    ) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = rotary.apply(&q, &k, start_pos)?;

        let (k, v) = match cache {
            Some(layer) => layer.append(k, v)?,
            None => (k, v),
        };

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let mask = decode_mask(seq_len, start_pos, x.device(), scores.dtype())?;
        let weights = candle_nn::ops::softmax_last_dim(&scores.broadcast_add(&mask)?)?;

        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, seq_len, ()))?;
        Ok(self.o_proj.forward(&out)?)
    }
}

/// SwiGLU feed-forward block
struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &DecoderConfig) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(config.hidden_size, config.intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(config.hidden_size, config.intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(config.intermediate_size, config.hidden_size, vb.pp("down_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: FeedForward,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &DecoderConfig, qkv_bias: bool) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config, qkv_bias)?,
            mlp: FeedForward::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        start_pos: usize,
        cache: Option<&mut LayerKv>,
    ) -> Result<Tensor> {
        let residual = x;
        let h = self.input_layernorm.forward(x)?;
        let h = self.self_attn.forward(&h, rotary, start_pos, cache)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.post_attention_layernorm.forward(&x)?;
        let h = self.mlp.forward(&h)?;
        Ok((residual + h)?)
    }
}

/// Safetensors index for sharded checkpoints
#[derive(Debug, serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// LLaMA-family causal decoder
pub struct LlamaDecoder {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    /// `None` when the checkpoint ties the output projection to `embed_tokens`
    lm_head: Option<Linear>,
    rotary: RotaryEmbedding,
    vocab_size: usize,
}

impl LlamaDecoder {
    /// Load config and weights from a HuggingFace repo
    pub fn load(
        repo: &ApiRepo,
        architecture: ModelArchitecture,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
        let config: DecoderConfig = serde_json::from_str(&config_str)?;

        info!(
            "Model config: {} layers, {} hidden, {} vocab, {} kv heads",
            config.num_hidden_layers,
            config.hidden_size,
            config.vocab_size,
            config.num_kv_heads()
        );

        let weights_paths = if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
            let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

            let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
            shard_names.sort();
            shard_names.dedup();

            info!("Downloading {} shard files...", shard_names.len());
            shard_names
                .iter()
                .map(|name| {
                    repo.get(name)
                        .with_context(|| format!("Failed to download {name}"))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![repo
                .get("model.safetensors")
                .context("Failed to download model.safetensors")?]
        };

        // SAFETY: the safetensors files are not modified while mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights_paths, dtype, device)? };
        Self::from_var_builder(&config, architecture, vb, device, dtype)
    }

    /// Build the decoder from a `VarBuilder` rooted above `model.` / `lm_head.`
    pub fn from_var_builder(
        config: &DecoderConfig,
        architecture: ModelArchitecture,
        vb: VarBuilder,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let vb_model = vb.pp("model");

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb_model.pp("embed_tokens"))?;

        let qkv_bias = config.qkv_bias(architecture);
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            layers.push(DecoderLayer::load(
                vb_model.pp(format!("layers.{i}")),
                config,
                qkv_bias,
            )?);
        }

        let norm = candle_nn::rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;

        let lm_head = if config.tie_word_embeddings {
            None
        } else {
            Some(linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?)
        };

        let rotary = RotaryEmbedding::new(
            config.head_dim(),
            config.max_position_embeddings,
            config.rope_theta,
            device,
            dtype,
        )?;

        info!(
            "Decoder loaded ({} layers, tied embeddings: {})",
            config.num_hidden_layers, config.tie_word_embeddings
        );

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            vocab_size: config.vocab_size,
        })
    }

    fn project_to_vocab(&self, hidden: &Tensor) -> Result<Tensor> {
        match &self.lm_head {
            Some(lm_head) => Ok(lm_head.forward(hidden)?),
            None => Ok(hidden.broadcast_matmul(&self.embed_tokens.embeddings().t()?)?),
        }
    }

    fn run_layers(&self, input_ids: &Tensor, mut cache: Option<&mut KvCache>) -> Result<Tensor> {
        let start_pos = cache.as_ref().map_or(0, |c| c.seq_len());
        let mut hidden = self.embed_tokens.forward(input_ids)?;

        for (i, layer) in self.layers.iter().enumerate() {
            let layer_cache = cache.as_mut().map(|c| c.layer_mut(i));
            hidden = layer.forward(&hidden, &self.rotary, start_pos, layer_cache)?;
        }

        Ok(self.norm.forward(&hidden)?)
    }
}

impl DecoderBackend for LlamaDecoder {
    fn n_layers(&self) -> usize {
        self.layers.len()
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        let hidden = self.run_layers(input_ids, None)?;
        self.project_to_vocab(&hidden)
    }

    fn forward_step(&self, input_ids: &Tensor, cache: &mut KvCache) -> Result<Tensor> {
        let hidden = self.run_layers(input_ids, Some(cache))?;
        let seq_len = hidden.dim(1)?;
        let last = hidden.i((.., seq_len - 1, ..))?;
        self.project_to_vocab(&last)
    }
}
