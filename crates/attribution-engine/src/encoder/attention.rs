//! Multi-head self-attention with optional probability capture.

use candle_core::{Tensor, D};

use crate::error::AttributionResult;

use super::config::BertConfig;
use super::layer_err;
use super::weights::AttentionWeights;

/// Dimensions for Q/K/V projection operations.
struct ProjectionDims {
    batch_size: usize,
    seq_len: usize,
    hidden_size: usize,
}

/// Output of one self-attention block.
pub struct AttentionOutput {
    /// Projected context: [batch, seq_len, hidden]
    pub context: Tensor,
    /// Softmax probabilities [batch, heads, query, key] when requested.
    pub probs: Option<Tensor>,
}

/// Run self-attention forward pass.
///
/// `attention_mask` is the additive extended mask `[batch, 1, 1, seq_len]`.
pub fn self_attention_forward(
    hidden_states: &Tensor,
    attention: &AttentionWeights,
    attention_mask: &Tensor,
    config: &BertConfig,
    layer_idx: usize,
    capture_probs: bool,
) -> AttributionResult<AttentionOutput> {
    let (batch_size, seq_len, hidden_size) = hidden_states
        .dims3()
        .map_err(layer_err(layer_idx, "attention get dims"))?;
    let num_heads = config.num_attention_heads;
    let head_dim = config.head_dim();

    let hidden_flat = hidden_states
        .reshape((batch_size * seq_len, hidden_size))
        .map_err(layer_err(layer_idx, "flatten hidden"))?;

    let dims = ProjectionDims {
        batch_size,
        seq_len,
        hidden_size,
    };
    let query = project_qkv(&hidden_flat, &attention.query_weight, &attention.query_bias, &dims, layer_idx)?;
    let key = project_qkv(&hidden_flat, &attention.key_weight, &attention.key_bias, &dims, layer_idx)?;
    let value = project_qkv(&hidden_flat, &attention.value_weight, &attention.value_bias, &dims, layer_idx)?;

    // [batch, heads, seq_len, head_dim]
    let query = split_heads(&query, &dims, num_heads, head_dim, layer_idx)?;
    let key = split_heads(&key, &dims, num_heads, head_dim, layer_idx)?;
    let value = split_heads(&value, &dims, num_heads, head_dim, layer_idx)?;

    let key_t = key
        .transpose(2, 3)
        .map_err(layer_err(layer_idx, "K transpose"))?
        .contiguous()
        .map_err(layer_err(layer_idx, "K^T contiguous"))?;

    let scores = (query
        .matmul(&key_t)
        .map_err(layer_err(layer_idx, "QK matmul"))?
        / (head_dim as f64).sqrt())
    .map_err(layer_err(layer_idx, "attention scale"))?
    .broadcast_add(attention_mask)
    .map_err(layer_err(layer_idx, "attention mask add"))?;

    let attention_probs =
        candle_nn::ops::softmax(&scores, D::Minus1).map_err(layer_err(layer_idx, "softmax"))?;

    let context = attention_probs
        .matmul(&value)
        .map_err(layer_err(layer_idx, "context matmul"))?
        .transpose(1, 2)
        .map_err(layer_err(layer_idx, "context transpose"))?
        .contiguous()
        .map_err(layer_err(layer_idx, "context contiguous"))?
        .reshape((batch_size * seq_len, hidden_size))
        .map_err(layer_err(layer_idx, "context reshape"))?;

    let output = context
        .matmul(
            &attention
                .output_weight
                .t()
                .map_err(layer_err(layer_idx, "output transpose"))?,
        )
        .map_err(layer_err(layer_idx, "output matmul"))?
        .broadcast_add(&attention.output_bias)
        .map_err(layer_err(layer_idx, "output bias"))?
        .reshape((batch_size, seq_len, hidden_size))
        .map_err(layer_err(layer_idx, "output reshape"))?;

    Ok(AttentionOutput {
        context: output,
        probs: capture_probs.then_some(attention_probs),
    })
}

/// Project flattened hidden states to Q, K, or V: [batch, seq_len, hidden].
fn project_qkv(
    hidden_flat: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    dims: &ProjectionDims,
    layer_idx: usize,
) -> AttributionResult<Tensor> {
    hidden_flat
        .matmul(&weight.t().map_err(layer_err(layer_idx, "QKV transpose"))?)
        .map_err(layer_err(layer_idx, "QKV matmul"))?
        .broadcast_add(bias)
        .map_err(layer_err(layer_idx, "QKV bias"))?
        .reshape((dims.batch_size, dims.seq_len, dims.hidden_size))
        .map_err(layer_err(layer_idx, "QKV reshape"))
}

/// [batch, seq_len, hidden] -> [batch, heads, seq_len, head_dim]
fn split_heads(
    tensor: &Tensor,
    dims: &ProjectionDims,
    num_heads: usize,
    head_dim: usize,
    layer_idx: usize,
) -> AttributionResult<Tensor> {
    tensor
        .reshape((dims.batch_size, dims.seq_len, num_heads, head_dim))
        .map_err(layer_err(layer_idx, "head reshape"))?
        .transpose(1, 2)
        .map_err(layer_err(layer_idx, "head transpose"))?
        .contiguous()
        .map_err(layer_err(layer_idx, "head contiguous"))
}
