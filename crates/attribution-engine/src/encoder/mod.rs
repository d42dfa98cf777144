//! BERT text encoder on candle tensors.
//!
//! The forward pass is split at the embedding layer so gradient-based
//! attribution can start from a differentiable embedding leaf:
//!
//! ```text
//! input_ids ──embed()──▶ embeddings ──forward_embeddings()──▶ EncoderOutput
//!                         [b, s, h]                            last_hidden_state [b, s, h]
//!                                                              attentions (optional)
//! ```
//!
//! The pooled sentence encoding is the hidden state at position 0.
//! Every op is differentiable with respect to the embeddings; weights are
//! plain tensors and never accumulate gradients.

mod attention;
mod config;
mod embeddings;
mod ffn;
mod layer;
mod layer_norm;
mod loader;
mod weights;

use std::path::Path;

use candle_core::{Device, IndexOp, Tensor};

use crate::error::{tensor_err, AttributionError, AttributionResult};

pub use config::BertConfig;
pub use loader::load_bert_weights;
pub use weights::{AttentionWeights, BertWeights, EmbeddingWeights, EncoderLayerWeights, FfnWeights};

use embeddings::compute_embeddings;
use layer::encoder_layer_forward;

/// Attach layer index and operation to a candle error.
pub(crate) fn layer_err(
    layer_idx: usize,
    op: &'static str,
) -> impl Fn(candle_core::Error) -> AttributionError {
    move |e| AttributionError::Tensor {
        message: format!("layer {} {} failed: {}", layer_idx, op, e),
    }
}

/// Result of an encoder forward pass.
#[derive(Debug)]
pub struct EncoderOutput {
    /// [batch, seq_len, hidden]
    pub last_hidden_state: Tensor,
    /// Per-layer attention probabilities [batch, heads, query, key].
    pub attentions: Option<Vec<Tensor>>,
}

impl EncoderOutput {
    /// Pooled encoding (position 0): [batch, hidden].
    pub fn pooled(&self) -> AttributionResult<Tensor> {
        self.last_hidden_state
            .i((.., 0))
            .map_err(tensor_err("pooled position 0"))
    }

    /// Hidden states of the non-boundary positions of one row: [len - 2, hidden].
    ///
    /// `len` is the unpadded length of that row, boundary tokens included.
    pub fn content_states(&self, row: usize, len: usize) -> AttributionResult<Tensor> {
        self.last_hidden_state
            .i(row)
            .map_err(tensor_err("content row select"))?
            .narrow(0, 1, len.saturating_sub(2))
            .map_err(tensor_err("content narrow"))
    }
}

/// A BERT encoder with read-only weights.
#[derive(Debug)]
pub struct BertEncoder {
    weights: BertWeights,
}

impl BertEncoder {
    pub fn new(weights: BertWeights) -> AttributionResult<Self> {
        weights.config.validate()?;
        if weights.encoder_layers.len() != weights.config.num_hidden_layers {
            return Err(AttributionError::Config {
                message: format!(
                    "config declares {} layers, weights provide {}",
                    weights.config.num_hidden_layers,
                    weights.encoder_layers.len()
                ),
            });
        }
        Ok(Self { weights })
    }

    /// Load `config.json` and `model.safetensors` from a model directory.
    pub fn load(model_dir: &Path, device: &Device) -> AttributionResult<Self> {
        Self::new(load_bert_weights(model_dir, device)?)
    }

    pub fn config(&self) -> &BertConfig {
        &self.weights.config
    }

    pub fn device(&self) -> &Device {
        &self.weights.device
    }

    pub fn hidden_size(&self) -> usize {
        self.weights.config.hidden_size
    }

    pub fn param_count(&self) -> usize {
        self.weights.param_count()
    }

    /// Embedding-layer output for `[batch, seq_len]` ids.
    pub fn embed(&self, input_ids: &Tensor) -> AttributionResult<Tensor> {
        compute_embeddings(input_ids, &self.weights)
    }

    /// Run every encoder layer starting from embedding-layer output.
    ///
    /// `attention_mask` is `[batch, seq_len]` with 1.0 on real tokens.
    pub fn forward_embeddings(
        &self,
        embeddings: &Tensor,
        attention_mask: &Tensor,
        capture_attentions: bool,
    ) -> AttributionResult<EncoderOutput> {
        let extended_mask = extended_attention_mask(attention_mask)?;

        let mut hidden_states = embeddings.clone();
        let mut attentions = capture_attentions
            .then(|| Vec::with_capacity(self.weights.encoder_layers.len()));

        for (layer_idx, layer) in self.weights.encoder_layers.iter().enumerate() {
            let (next, probs) = encoder_layer_forward(
                &hidden_states,
                layer,
                &extended_mask,
                &self.weights.config,
                layer_idx,
                capture_attentions,
            )?;
            hidden_states = next;
            if let (Some(all), Some(p)) = (attentions.as_mut(), probs) {
                all.push(p);
            }
        }

        Ok(EncoderOutput {
            last_hidden_state: hidden_states,
            attentions,
        })
    }

    /// Full forward pass from token ids.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        capture_attentions: bool,
    ) -> AttributionResult<EncoderOutput> {
        let embeddings = self.embed(input_ids)?;
        self.forward_embeddings(&embeddings, attention_mask, capture_attentions)
    }
}

/// [batch, seq_len] mask -> additive [batch, 1, 1, seq_len]: 1.0 -> 0.0, 0.0 -> -10000.0
fn extended_attention_mask(attention_mask: &Tensor) -> AttributionResult<Tensor> {
    let mask = attention_mask
        .unsqueeze(1)
        .map_err(tensor_err("attention mask unsqueeze 1"))?
        .unsqueeze(2)
        .map_err(tensor_err("attention mask unsqueeze 2"))?;
    mask.affine(10000.0, -10000.0)
        .map_err(tensor_err("attention mask scale"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_mask_values() {
        let mask = Tensor::new(&[[1.0f32, 1.0, 0.0]], &Device::Cpu).unwrap();
        let ext = extended_attention_mask(&mask).unwrap();
        assert_eq!(ext.dims(), &[1, 1, 1, 3]);
        let values: Vec<f32> = ext.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![0.0, 0.0, -10000.0]);
    }

    #[test]
    fn test_layer_err_message() {
        let err = layer_err(3, "softmax")(candle_core::Error::Msg("nan".into()));
        assert!(err.to_string().contains("layer 3 softmax failed"));
    }
}
