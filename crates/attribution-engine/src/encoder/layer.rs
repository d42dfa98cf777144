//! Encoder layer: self-attention and FFN, each with residual + LayerNorm.

use candle_core::Tensor;

use crate::error::AttributionResult;

use super::attention::self_attention_forward;
use super::config::BertConfig;
use super::ffn::ffn_forward;
use super::layer_err;
use super::layer_norm::layer_norm;
use super::weights::EncoderLayerWeights;

/// Run single encoder layer. Returns the new hidden states and, when
/// requested, the layer's attention probabilities.
pub fn encoder_layer_forward(
    hidden_states: &Tensor,
    layer: &EncoderLayerWeights,
    attention_mask: &Tensor,
    config: &BertConfig,
    layer_idx: usize,
    capture_probs: bool,
) -> AttributionResult<(Tensor, Option<Tensor>)> {
    let attention = self_attention_forward(
        hidden_states,
        &layer.attention,
        attention_mask,
        config,
        layer_idx,
        capture_probs,
    )?;

    // Add & Norm (attention)
    let attention_output = (hidden_states + &attention.context)
        .map_err(layer_err(layer_idx, "attention residual"))?;
    let attention_output = layer_norm(
        &attention_output,
        &layer.attention.layer_norm_weight,
        &layer.attention.layer_norm_bias,
        config.layer_norm_eps,
    )?;

    let ffn_output = ffn_forward(&attention_output, &layer.ffn, layer_idx)?;

    // Add & Norm (FFN)
    let output =
        (&attention_output + &ffn_output).map_err(layer_err(layer_idx, "FFN residual"))?;
    let output = layer_norm(
        &output,
        &layer.ffn.layer_norm_weight,
        &layer.ffn.layer_norm_bias,
        config.layer_norm_eps,
    )?;

    Ok((output, attention.probs))
}
