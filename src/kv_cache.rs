//! Per-layer key/value cache for incremental decoding
//!
//! Sampling `num_generations` continuations from one prompt prefills the
//! prompt once and then forks the cache for every sample; cloning is cheap
//! because candle tensors share storage.
//!
//! Layout per layer: `[batch, num_kv_heads, seq_len, head_dim]`.

use anyhow::Result;
use candle_core::Tensor;

/// Cached keys and values of one decoder layer
#[derive(Debug, Clone, Default)]
pub struct LayerKv {
    keys: Option<Tensor>,
    values: Option<Tensor>,
}

impl LayerKv {
    /// Append new keys/values along the sequence axis and return the full tensors
    pub fn append(&mut self, k: Tensor, v: Tensor) -> Result<(Tensor, Tensor)> {
        let (k, v) = match (self.keys.as_ref(), self.values.as_ref()) {
            (Some(prev_k), Some(prev_v)) => {
                (Tensor::cat(&[prev_k, &k], 2)?, Tensor::cat(&[prev_v, &v], 2)?)
            }
            _ => (k, v),
        };
        self.keys = Some(k.clone());
        self.values = Some(v.clone());
        Ok((k, v))
    }

    pub fn seq_len(&self) -> usize {
        self.keys.as_ref().map_or(0, |k| k.dim(2).unwrap_or(0))
    }
}

/// Key/value cache across all layers of a decoder
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    layers: Vec<LayerKv>,
}

impl KvCache {
    pub fn new(n_layers: usize) -> Self {
        Self {
            layers: vec![LayerKv::default(); n_layers],
        }
    }

    /// Cached positions (0 when empty)
    pub fn seq_len(&self) -> usize {
        self.layers.first().map_or(0, LayerKv::seq_len)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|l| l.keys.is_none())
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_mut(&mut self, layer: usize) -> &mut LayerKv {
        &mut self.layers[layer]
    }

    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            *layer = LayerKv::default();
        }
    }
}
