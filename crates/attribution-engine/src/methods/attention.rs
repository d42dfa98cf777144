//! Attention received per token, averaged over layers and heads.

use candle_core::Tensor;

use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::tokenize::strip_boundary;

use super::{Attribution, AttributionTarget, ImportanceMethod, Method, MethodContext};

/// Sums attention probabilities over layers, heads and query positions,
/// then divides by `layers * heads`.
///
/// One forward pass, no gradient. Scores are non-negative and identical
/// across repeated calls. The target is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttentionImportance;

impl ImportanceMethod for AttentionImportance {
    fn method(&self) -> Method {
        Method::Attention
    }

    fn explain(
        &self,
        ctx: &MethodContext<'_>,
        text: &str,
        _target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution> {
        let tokenized = ctx.tokenize(text)?;
        let output = ctx.adapter.encode(&tokenized, true)?;
        let attentions = output.attentions.ok_or_else(|| AttributionError::Tensor {
            message: "encoder returned no attention probabilities".to_string(),
        })?;

        let units = ctx.adapter.encoder().config().attention_units();
        let received = attention_received(&attentions, units)?;

        tracing::debug!(
            target: "attribution_engine::methods",
            method = "attention",
            layers = attentions.len(),
            tokens = tokenized.content_len(),
            "Attention importance computed"
        );

        Ok(Attribution::new(
            Method::Attention,
            &tokenized,
            strip_boundary(&received),
        ))
    }
}

/// `[1, heads, query, key]` per layer -> attention received per key position.
fn attention_received(attentions: &[Tensor], units: usize) -> AttributionResult<Vec<f32>> {
    let stacked = Tensor::stack(attentions, 0).map_err(tensor_err("attention stack"))?;
    // [layers, 1, heads, query, key] -> [1, key]
    let summed = stacked
        .sum(3)
        .map_err(tensor_err("attention query sum"))?
        .sum(2)
        .map_err(tensor_err("attention head sum"))?
        .sum(0)
        .map_err(tensor_err("attention layer sum"))?;
    (summed / units as f64)
        .map_err(tensor_err("attention normalize"))?
        .squeeze(0)
        .map_err(tensor_err("attention squeeze"))?
        .to_vec1()
        .map_err(tensor_err("attention to vec"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_attention_received_sums_queries() {
        // One layer, one head, 3 tokens. Column sums: 1.0, 1.5, 0.5.
        let probs = Tensor::new(
            &[[[[0.5f32, 0.5, 0.0], [0.25, 0.5, 0.25], [0.25, 0.5, 0.25]]]],
            &Device::Cpu,
        )
        .unwrap();
        let received = attention_received(&[probs], 1).unwrap();
        assert_eq!(received, vec![1.0, 1.5, 0.5]);
    }

    #[test]
    fn test_attention_received_normalizes_by_units() {
        let probs = Tensor::ones((1, 2, 2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let received = attention_received(&[probs.clone(), probs], 4).unwrap();
        // 2 layers * 2 heads * 2 queries / 4
        assert_eq!(received, vec![2.0, 2.0]);
    }
}
