//! Feed-forward network: intermediate -> GELU -> output.

use candle_core::Tensor;

use crate::error::AttributionResult;

use super::layer_err;
use super::weights::FfnWeights;

/// Run FFN forward pass on `[batch, seq_len, hidden]`.
pub fn ffn_forward(hidden_states: &Tensor, ffn: &FfnWeights, layer_idx: usize) -> AttributionResult<Tensor> {
    let (batch_size, seq_len, hidden_size) = hidden_states
        .dims3()
        .map_err(layer_err(layer_idx, "FFN get dims"))?;

    // Flatten for matmul: [batch*seq, hidden]
    let hidden_flat = hidden_states
        .reshape((batch_size * seq_len, hidden_size))
        .map_err(layer_err(layer_idx, "FFN flatten"))?;

    let intermediate = hidden_flat
        .matmul(
            &ffn.intermediate_weight
                .t()
                .map_err(layer_err(layer_idx, "FFN intermediate transpose"))?,
        )
        .map_err(layer_err(layer_idx, "FFN intermediate matmul"))?
        .broadcast_add(&ffn.intermediate_bias)
        .map_err(layer_err(layer_idx, "FFN intermediate bias"))?
        .gelu_erf()
        .map_err(layer_err(layer_idx, "GELU"))?;

    intermediate
        .matmul(
            &ffn.output_weight
                .t()
                .map_err(layer_err(layer_idx, "FFN output transpose"))?,
        )
        .map_err(layer_err(layer_idx, "FFN output matmul"))?
        .broadcast_add(&ffn.output_bias)
        .map_err(layer_err(layer_idx, "FFN output bias"))?
        .reshape((batch_size, seq_len, hidden_size))
        .map_err(layer_err(layer_idx, "FFN reshape"))
}
