//! Additive attention masks for the decoder forward pass
//!
//! A mask has shape `[1, 1, new_len, start_pos + new_len]` and holds `0.0`
//! where query `i` may attend key `j` (`j <= start_pos + i`) and `-inf`
//! elsewhere. Square masks (`start_pos == 0`) are memoised per
//! `(len, device, dtype)` since scoring reuses the same lengths constantly.

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

type MaskKey = (usize, String, DType);

static CAUSAL_MASKS: LazyLock<Mutex<HashMap<MaskKey, Tensor>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn mask_key(len: usize, device: &Device, dtype: DType) -> MaskKey {
    (len, format!("{:?}", device.location()), dtype)
}

fn mask_values(new_len: usize, total_len: usize, start_pos: usize) -> Vec<f32> {
    (0..new_len)
        .flat_map(|i| {
            (0..total_len).map(move |j| {
                if j <= start_pos + i {
                    0.0
                } else {
                    f32::NEG_INFINITY
                }
            })
        })
        .collect()
}

/// Square causal mask `[1, 1, len, len]`, served from the cache when possible
pub fn causal_mask(len: usize, device: &Device, dtype: DType) -> Result<Tensor> {
    let key = mask_key(len, device, dtype);
    {
        let cache = CAUSAL_MASKS.lock().map_err(|_| anyhow!("mask cache poisoned"))?;
        if let Some(mask) = cache.get(&key) {
            return Ok(mask.clone());
        }
    }

    let mask = Tensor::from_vec(mask_values(len, len, 0), (1, 1, len, len), device)?
        .to_dtype(dtype)?;
    CAUSAL_MASKS
        .lock()
        .map_err(|_| anyhow!("mask cache poisoned"))?
        .insert(key, mask.clone());
    Ok(mask)
}

/// Mask for `new_len` queries appended after `start_pos` cached positions
pub fn decode_mask(
    new_len: usize,
    start_pos: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let total_len = start_pos + new_len;
    if start_pos == 0 {
        return causal_mask(new_len, device, dtype);
    }
    if new_len == 1 {
        return Ok(Tensor::zeros((1, 1, 1, total_len), dtype, device)?);
    }
    let values = mask_values(new_len, total_len, start_pos);
    Ok(Tensor::from_vec(values, (1, 1, new_len, total_len), device)?.to_dtype(dtype)?)
}

/// Drop every memoised mask
pub fn clear_mask_cache() {
    if let Ok(mut cache) = CAUSAL_MASKS.lock() {
        cache.clear();
    }
}

/// Number of memoised masks
pub fn mask_cache_len() -> usize {
    CAUSAL_MASKS.lock().map(|c| c.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn is_neg_inf(v: f32) -> bool {
        v.is_infinite() && v < 0.0
    }

    #[test]
    #[serial]
    fn test_causal_mask_values() {
        let mask = causal_mask(3, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 3, 3]);
        let data: Vec<f32> = mask.flatten_all().unwrap().to_vec1().unwrap();

        assert_eq!(data[0], 0.0);
        assert!(is_neg_inf(data[1]) && is_neg_inf(data[2]));
        assert_eq!(&data[3..5], &[0.0, 0.0]);
        assert!(is_neg_inf(data[5]));
        assert_eq!(&data[6..9], &[0.0, 0.0, 0.0]);
    }

    #[test]
    #[serial]
    fn test_causal_mask_memoised() {
        clear_mask_cache();
        assert_eq!(mask_cache_len(), 0);

        causal_mask(4, &Device::Cpu, DType::F32).unwrap();
        causal_mask(4, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask_cache_len(), 1);

        causal_mask(5, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask_cache_len(), 2);
    }

    #[test]
    fn test_single_step_mask_is_open() {
        let mask = decode_mask(1, 6, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 1, 7]);
        let data: Vec<f32> = mask.flatten_all().unwrap().to_vec1().unwrap();
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_chunk_after_cache() {
        // two new queries after three cached positions
        let mask = decode_mask(2, 3, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 2, 5]);
        let data: Vec<f32> = mask.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(&data[0..4], &[0.0; 4]);
        assert!(is_neg_inf(data[4]));
        assert_eq!(&data[5..10], &[0.0; 5]);
    }
}
