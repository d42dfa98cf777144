//! BERT weight structures.

use candle_core::{Device, Tensor};

use super::config::BertConfig;

/// Embedding layer weights.
#[derive(Debug)]
pub struct EmbeddingWeights {
    /// Word embeddings: [vocab_size, hidden_size]
    pub word_embeddings: Tensor,
    /// Position embeddings: [max_position, hidden_size]
    pub position_embeddings: Tensor,
    /// Token type embeddings: [type_vocab_size, hidden_size]
    pub token_type_embeddings: Tensor,
    /// LayerNorm weight: [hidden_size]
    pub layer_norm_weight: Tensor,
    /// LayerNorm bias: [hidden_size]
    pub layer_norm_bias: Tensor,
}

/// Self-attention weights.
#[derive(Debug)]
pub struct AttentionWeights {
    /// Query projection: [hidden_size, hidden_size]
    pub query_weight: Tensor,
    pub query_bias: Tensor,
    /// Key projection: [hidden_size, hidden_size]
    pub key_weight: Tensor,
    pub key_bias: Tensor,
    /// Value projection: [hidden_size, hidden_size]
    pub value_weight: Tensor,
    pub value_bias: Tensor,
    /// Output projection: [hidden_size, hidden_size]
    pub output_weight: Tensor,
    pub output_bias: Tensor,
    /// Attention output LayerNorm: [hidden_size]
    pub layer_norm_weight: Tensor,
    pub layer_norm_bias: Tensor,
}

/// Feed-forward weights.
#[derive(Debug)]
pub struct FfnWeights {
    /// Intermediate projection: [intermediate_size, hidden_size]
    pub intermediate_weight: Tensor,
    pub intermediate_bias: Tensor,
    /// Output projection: [hidden_size, intermediate_size]
    pub output_weight: Tensor,
    pub output_bias: Tensor,
    /// Output LayerNorm: [hidden_size]
    pub layer_norm_weight: Tensor,
    pub layer_norm_bias: Tensor,
}

/// One encoder layer.
#[derive(Debug)]
pub struct EncoderLayerWeights {
    pub attention: AttentionWeights,
    pub ffn: FfnWeights,
}

/// Complete encoder weights. Read-only once built.
#[derive(Debug)]
pub struct BertWeights {
    pub config: BertConfig,
    pub embeddings: EmbeddingWeights,
    pub encoder_layers: Vec<EncoderLayerWeights>,
    pub device: Device,
}

impl BertWeights {
    /// Total number of parameters.
    pub fn param_count(&self) -> usize {
        let e = &self.embeddings;
        let mut count = [
            &e.word_embeddings,
            &e.position_embeddings,
            &e.token_type_embeddings,
            &e.layer_norm_weight,
            &e.layer_norm_bias,
        ]
        .iter()
        .map(|t| t.elem_count())
        .sum::<usize>();

        for layer in &self.encoder_layers {
            let a = &layer.attention;
            let f = &layer.ffn;
            count += [
                &a.query_weight,
                &a.query_bias,
                &a.key_weight,
                &a.key_bias,
                &a.value_weight,
                &a.value_bias,
                &a.output_weight,
                &a.output_bias,
                &a.layer_norm_weight,
                &a.layer_norm_bias,
                &f.intermediate_weight,
                &f.intermediate_bias,
                &f.output_weight,
                &f.output_bias,
                &f.layer_norm_weight,
                &f.layer_norm_bias,
            ]
            .iter()
            .map(|t| t.elem_count())
            .sum::<usize>();
        }
        count
    }
}
