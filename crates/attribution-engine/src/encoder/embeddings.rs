//! Embedding layer: word + position + token_type, then LayerNorm.

use candle_core::Tensor;

use crate::error::{tensor_err, AttributionError, AttributionResult};

use super::layer_norm::layer_norm;
use super::weights::BertWeights;

/// Compute embedding-layer output for `[batch, seq_len]` input ids.
///
/// Token types are all zero (single-sentence inputs). Output is
/// `[batch, seq_len, hidden_size]`.
pub fn compute_embeddings(input_ids: &Tensor, weights: &BertWeights) -> AttributionResult<Tensor> {
    let config = &weights.config;
    let (batch_size, seq_len) = input_ids
        .dims2()
        .map_err(tensor_err("embeddings input_ids dims"))?;

    if seq_len > config.max_position_embeddings {
        return Err(AttributionError::Tensor {
            message: format!(
                "sequence length {} exceeds max_position_embeddings {}",
                seq_len, config.max_position_embeddings
            ),
        });
    }

    // Word embeddings
    let word_embeds = weights
        .embeddings
        .word_embeddings
        .index_select(
            &input_ids
                .flatten_all()
                .map_err(tensor_err("flatten input_ids"))?,
            0,
        )
        .map_err(tensor_err("word embedding lookup"))?
        .reshape((batch_size, seq_len, config.hidden_size))
        .map_err(tensor_err("word embedding reshape"))?;

    // Position embeddings: [seq_len, hidden], broadcast over batch
    let position_embeds = weights
        .embeddings
        .position_embeddings
        .narrow(0, 0, seq_len)
        .map_err(tensor_err("position embedding narrow"))?;

    // Token type 0 for every position: [hidden]
    let token_type_embeds = weights
        .embeddings
        .token_type_embeddings
        .get(0)
        .map_err(tensor_err("token_type embedding row"))?;

    let embeddings = word_embeds
        .broadcast_add(&position_embeds)
        .map_err(tensor_err("embedding add position"))?
        .broadcast_add(&token_type_embeds)
        .map_err(tensor_err("embedding add token_type"))?;

    layer_norm(
        &embeddings,
        &weights.embeddings.layer_norm_weight,
        &weights.embeddings.layer_norm_bias,
        config.layer_norm_eps,
    )
}
