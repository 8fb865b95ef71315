//! Device choice and question encoding for the MiniLM embedder.

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;
use tracing::debug;

/// Metal when the `metal` feature is on and a GPU is present, CPU otherwise.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(dev) => {
                debug!(device = "metal", "embedding device selected");
                return dev;
            }
            Err(e) => tracing::warn!(error = %e, "metal unavailable, using CPU"),
        }
    }
    debug!(device = "cpu", "embedding device selected");
    Device::Cpu
}

/// Model inputs for a single question, each shaped `[1, T]`.
pub struct Encoded {
    pub input_ids: Tensor,
    pub token_type_ids: Tensor,
    pub attention_mask: Tensor,
}

/// Tokenizes `text`, keeping at most `max_len` tokens. Questions are encoded
/// one at a time, so there is no padding.
pub fn encode_question(tokenizer: &Tokenizer, text: &str, max_len: usize, device: &Device) -> Result<Encoded> {
    let enc = tokenizer.encode(text, true).map_err(|e| anyhow!("tokenization failed: {e}"))?;
    let keep = enc.len().min(max_len.max(1));
    let row = |values: &[u32]| -> Result<Tensor> {
        Ok(Tensor::new(&values[..keep], device)?.unsqueeze(0)?)
    };
    Ok(Encoded {
        input_ids: row(enc.get_ids())?,
        token_type_ids: row(enc.get_type_ids())?,
        attention_mask: row(enc.get_attention_mask())?,
    })
}
