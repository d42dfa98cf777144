//! LayerNorm built from differentiable primitives.

use candle_core::{Tensor, D};

use crate::error::{tensor_err, AttributionResult};

/// Apply LayerNorm: (x - mean) / sqrt(var + eps) * weight + bias
///
/// Composed of elementary ops so gradients flow back to `x`.
pub fn layer_norm(x: &Tensor, weight: &Tensor, bias: &Tensor, eps: f64) -> AttributionResult<Tensor> {
    let mean = x
        .mean_keepdim(D::Minus1)
        .map_err(tensor_err("LayerNorm mean"))?;
    let x_centered = x
        .broadcast_sub(&mean)
        .map_err(tensor_err("LayerNorm center"))?;
    let var = x_centered
        .sqr()
        .map_err(tensor_err("LayerNorm sqr"))?
        .mean_keepdim(D::Minus1)
        .map_err(tensor_err("LayerNorm var mean"))?;
    let std = (var + eps)
        .map_err(tensor_err("LayerNorm var add eps"))?
        .sqrt()
        .map_err(tensor_err("LayerNorm sqrt"))?;

    x_centered
        .broadcast_div(&std)
        .map_err(tensor_err("LayerNorm div"))?
        .broadcast_mul(weight)
        .map_err(tensor_err("LayerNorm scale"))?
        .broadcast_add(bias)
        .map_err(tensor_err("LayerNorm bias"))
}
