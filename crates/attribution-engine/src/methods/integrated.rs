//! Integrated gradients at the embedding layer.
//!
//! ```text
//! attr_i = sum_h (x - x0)_ih * sum_k w_k * df/dx_ih (x0 + a_k (x - x0))
//! a_k = k / (n - 1),  w_k = 1 / (n - 1), halved at k = 0 and k = n - 1
//! ```
//!
//! Interpolated rows are forwarded `internal_batch_size` at a time with one
//! backward pass per chunk. Completeness is checked over every position,
//! boundary tokens included; the returned importance drops the boundaries.

use candle_core::{DType, Tensor, Var, D};

use crate::adapter::Mode;
use crate::config::{BaselineKind, IntegratedConfig};
use crate::diagnostics::Diagnostic;
use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::tokenize::{strip_boundary, TokenizedText};

use super::{Attribution, AttributionTarget, ImportanceMethod, Method, MethodContext};

/// Integrated gradients from a `[PAD]` (or zero) baseline to the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegratedGradients;

/// Raw result of one integrated-gradients run.
#[derive(Debug, Clone)]
pub struct IntegratedOutcome {
    /// Content-token attributions.
    pub importance: Vec<f32>,
    /// `sum(all attributions) - (f(x) - f(x0))`
    pub delta: f32,
    /// `f(x)`
    pub target_input: f32,
    /// `f(x0)`
    pub target_baseline: f32,
    pub diagnostics: Vec<Diagnostic>,
}

impl IntegratedGradients {
    /// Attribute `f` over the tokens of `tokenized`.
    ///
    /// `f` is the inner product of the pooled encoding with `reference`
    /// when given (`Mode::IntegradFromSimilarity`), otherwise the sum of the
    /// pooled components (`Mode::Integrad`).
    pub fn attribute(
        ctx: &MethodContext<'_>,
        tokenized: &TokenizedText,
        reference: Option<&Tensor>,
    ) -> AttributionResult<IntegratedOutcome> {
        let config = &ctx.config.integrated;
        let device = ctx.adapter.encoder().device();
        let seq_len = tokenized.len();

        let input = ctx.adapter.embed(&tokenized.input_ids(device)?)?;
        let baseline = match config.baseline {
            BaselineKind::PadTokens => {
                let pad_ids = Tensor::full(ctx.tokenizer.pad_id(), (1, seq_len), device)
                    .map_err(tensor_err("pad baseline ids"))?;
                ctx.adapter.embed(&pad_ids)?
            }
            BaselineKind::Zeros => input.zeros_like().map_err(tensor_err("zero baseline"))?,
        };
        let diff = (&input - &baseline).map_err(tensor_err("input minus baseline"))?;

        let mode = if reference.is_some() {
            Mode::IntegradFromSimilarity
        } else {
            Mode::Integrad
        };
        let _guard = ctx.adapter.enter(mode)?;

        let (alphas, weights) = trapezoid(config.n_steps);
        let mut accumulated = input.zeros_like().map_err(tensor_err("gradient accumulator"))?;
        let mut targets = Vec::with_capacity(config.n_steps);

        for (chunk_alphas, chunk_weights) in alphas
            .chunks(config.internal_batch_size)
            .zip(weights.chunks(config.internal_batch_size))
        {
            let rows = chunk_alphas.len();
            let alpha = Tensor::from_slice(chunk_alphas, (rows, 1, 1), device)
                .map_err(tensor_err("alpha tensor"))?;
            let interpolated = diff
                .broadcast_mul(&alpha)
                .map_err(tensor_err("scale path"))?
                .broadcast_add(&baseline)
                .map_err(tensor_err("shift path"))?;
            let leaf = Var::from_tensor(&interpolated).map_err(tensor_err("path leaf"))?;
            let mask = Tensor::ones((rows, seq_len), DType::F32, device)
                .map_err(tensor_err("path mask"))?;

            let values = match reference {
                Some(reference) => ctx.adapter.forward_integrad_from_similarity(
                    leaf.as_tensor(),
                    &mask,
                    reference,
                )?,
                None => ctx.adapter.forward_integrad(leaf.as_tensor(), &mask)?,
            };
            targets.extend(
                values
                    .to_vec1::<f32>()
                    .map_err(tensor_err("path targets to vec"))?,
            );

            let weight = Tensor::from_slice(chunk_weights, rows, device)
                .map_err(tensor_err("weight tensor"))?;
            let weighted = (&values * &weight)
                .map_err(tensor_err("weight targets"))?
                .sum_all()
                .map_err(tensor_err("weighted target sum"))?;
            let grads = weighted.backward().map_err(tensor_err("path backward"))?;
            let grad = grads
                .get(leaf.as_tensor())
                .ok_or_else(|| AttributionError::Tensor {
                    message: "no gradient reached the interpolated embeddings".to_string(),
                })?;
            accumulated = (&accumulated
                + grad.sum_keepdim(0).map_err(tensor_err("chunk gradient sum"))?)
            .map_err(tensor_err("gradient accumulate"))?;
        }

        let attribution: Vec<f32> = (&diff * &accumulated)
            .map_err(tensor_err("attribution product"))?
            .sum(D::Minus1)
            .map_err(tensor_err("attribution hidden sum"))?
            .squeeze(0)
            .map_err(tensor_err("attribution squeeze"))?
            .to_vec1()
            .map_err(tensor_err("attribution to vec"))?;

        let target_baseline = targets.first().copied().unwrap_or_default();
        let target_input = targets.last().copied().unwrap_or_default();
        let gap = target_input - target_baseline;
        let delta = attribution.iter().sum::<f32>() - gap;

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        if let Some(diagnostic) = convergence_check(delta, gap, config) {
            tracing::warn!(
                target: "attribution_engine::methods",
                delta = delta,
                gap = gap,
                n_steps = config.n_steps,
                "Integrated gradients did not converge; consider more n_steps"
            );
            diagnostics.push(diagnostic);
        }

        tracing::debug!(
            target: "attribution_engine::methods",
            method = "integrad",
            mode = %mode,
            baseline = config.baseline.as_str(),
            delta = delta,
            "Integrated gradients computed"
        );

        Ok(IntegratedOutcome {
            importance: strip_boundary(&attribution),
            delta,
            target_input,
            target_baseline,
            diagnostics,
        })
    }
}

impl ImportanceMethod for IntegratedGradients {
    fn method(&self) -> Method {
        Method::Integrad
    }

    fn explain(
        &self,
        ctx: &MethodContext<'_>,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution> {
        let tokenized = ctx.tokenize(text)?;
        let reference = target
            .reference
            .map(|r| ctx.reference_encoding(r))
            .transpose()?;

        let outcome = Self::attribute(ctx, &tokenized, reference.as_ref())?;

        let mut attribution = Attribution::new(Method::Integrad, &tokenized, outcome.importance);
        attribution.convergence_delta = Some(outcome.delta);
        attribution.diagnostics.extend(outcome.diagnostics);
        Ok(attribution)
    }
}

/// Interpolation coefficients and trapezoid weights for `n >= 2` points.
fn trapezoid(n: usize) -> (Vec<f32>, Vec<f32>) {
    let step = 1.0 / (n - 1) as f32;
    let alphas = (0..n).map(|k| k as f32 * step).collect();
    let weights = (0..n)
        .map(|k| if k == 0 || k == n - 1 { step / 2.0 } else { step })
        .collect();
    (alphas, weights)
}

/// Non-convergence diagnostic when `|delta| > tolerance * max(|gap|, 1)`.
fn convergence_check(delta: f32, gap: f32, config: &IntegratedConfig) -> Option<Diagnostic> {
    let tolerance = config.convergence_tolerance * gap.abs().max(1.0);
    (!(delta.abs() <= tolerance)).then_some(Diagnostic::NumericalNonConvergence { delta, tolerance })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapezoid_weights_sum_to_one() {
        let (alphas, weights) = trapezoid(50);
        assert_eq!(alphas.len(), 50);
        assert_eq!(alphas[0], 0.0);
        assert!((alphas[49] - 1.0).abs() < 1e-6);
        assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((weights[0] - weights[1] / 2.0).abs() < 1e-7);
    }

    #[test]
    fn test_trapezoid_two_points() {
        let (alphas, weights) = trapezoid(2);
        assert_eq!(alphas, vec![0.0, 1.0]);
        assert_eq!(weights, vec![0.5, 0.5]);
    }

    #[test]
    fn test_convergence_check_relative_to_gap() {
        let config = IntegratedConfig::default();
        assert!(convergence_check(0.005, 0.2, &config).is_none());
        assert!(convergence_check(0.05, 10.0, &config).is_none());
        match convergence_check(0.5, 10.0, &config) {
            Some(Diagnostic::NumericalNonConvergence { delta, tolerance }) => {
                assert_eq!(delta, 0.5);
                assert!((tolerance - 0.1).abs() < 1e-6);
            }
            other => panic!("Expected NumericalNonConvergence, got {:?}", other),
        }
        assert!(convergence_check(f32::NAN, 1.0, &config).is_some());
    }
}
