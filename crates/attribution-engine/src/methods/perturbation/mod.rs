//! LIME-style perturbation importance.
//!
//! 1. Units are the content word pieces, located by byte offsets.
//! 2. `num_samples` keep-masks are drawn (row 0 keeps everything) and each
//!    removed unit is replaced by the mask token.
//! 3. The similarity classifier scores every variant against the support set.
//! 4. A weighted ridge surrogate on the masks predicts the probability of the
//!    support entry the unperturbed sentence matches best. Its coefficients
//!    are the importances.

pub mod sampler;
pub mod surrogate;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::classifier::argmax;
use crate::error::{AttributionError, AttributionResult};

use super::{Attribution, AttributionTarget, ImportanceMethod, Method, MethodContext};

pub use surrogate::{fit_surrogate, weighted_ridge, RidgeFit, SurrogateFit};

/// Fit summary of the surrogate model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurrogateSummary {
    /// Support-set position the surrogate explains.
    pub explained_index: usize,
    pub explained_label: String,
    pub intercept: f64,
    /// Weighted R^2 on the perturbed samples.
    pub score: f64,
    /// Surrogate prediction for the unperturbed sentence.
    pub local_pred: f64,
    /// Classifier probability for the unperturbed sentence.
    pub model_pred: f64,
}

/// Perturbation importance. Requires a support set.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerturbationImportance;

impl ImportanceMethod for PerturbationImportance {
    fn method(&self) -> Method {
        Method::Lime
    }

    fn explain(
        &self,
        ctx: &MethodContext<'_>,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution> {
        let support = target
            .support_set
            .filter(|s| !s.is_empty())
            .ok_or(AttributionError::MissingSupportSet { method: "lime" })?;
        let config = &ctx.config.perturbation;

        let tokenized = ctx.tokenize(text)?;
        let units = tokenized.offsets.len();

        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let masks = sampler::sample_masks(units, config.num_samples, &mut rng);
        let variants = masks
            .iter()
            .map(|keep| sampler::render(text, &tokenized.offsets, keep, ctx.tokenizer.mask_token()))
            .collect::<AttributionResult<Vec<_>>>()?;

        let classifier = ctx.classifier();
        let encoded = classifier.encode_support(support)?;
        let probabilities = classifier.classify(&variants, &encoded)?;

        let original = probabilities.first().ok_or_else(|| AttributionError::Tensor {
            message: "classifier returned no rows".to_string(),
        })?;
        let explained = argmax(original).ok_or(AttributionError::MissingSupportSet { method: "lime" })?;

        let x: Vec<Vec<f64>> = masks
            .iter()
            .map(|m| m.iter().map(|&k| if k { 1.0 } else { 0.0 }).collect())
            .collect();
        let y: Vec<f64> = probabilities.iter().map(|row| f64::from(row[explained])).collect();
        let w: Vec<f64> = masks
            .iter()
            .map(|m| sampler::kernel(sampler::distance(m), config.kernel_width))
            .collect();

        let fit = fit_surrogate(
            &x,
            &y,
            &w,
            config.num_features,
            config.selection_alpha,
            config.ridge_alpha,
        )?;

        let mut importance = vec![0.0f32; units];
        for (&unit, &coef) in fit.selected.iter().zip(&fit.coef) {
            importance[unit] = coef as f32;
        }

        if let Some(top) = argmax(&importance.iter().map(|v| v.abs()).collect::<Vec<_>>()) {
            tracing::debug!(
                target: "attribution_engine::methods",
                method = "lime",
                samples = masks.len(),
                explained = explained,
                top_unit = sampler::unit_label(&tokenized.content_tokens()[top]),
                score = fit.score,
                "Perturbation importance computed"
            );
        }

        let mut attribution = Attribution::new(Method::Lime, &tokenized, importance);
        attribution.surrogate = Some(SurrogateSummary {
            explained_index: explained,
            explained_label: support.examples[explained].label.clone(),
            intercept: fit.intercept,
            score: fit.score,
            local_pred: fit.local_pred,
            model_pred: y[0],
        });
        Ok(attribution)
    }
}
