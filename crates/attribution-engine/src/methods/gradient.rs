//! Raw-gradient saliency.

use crate::adapter::Mode;
use crate::error::{tensor_err, AttributionError, AttributionResult};

use super::{
    inner_product, saliency, Attribution, AttributionTarget, ImportanceMethod, Method,
    MethodContext,
};

/// `|d target / d embedding|` summed over the hidden dimension.
///
/// Target is the inner product with the reference encoding when a reference
/// is given, otherwise the sum of the pooled components.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientImportance;

impl ImportanceMethod for GradientImportance {
    fn method(&self) -> Method {
        Method::Gradient
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

        let _guard = ctx.adapter.enter(Mode::VanillaGrad)?;
        let (output, leaf) = ctx.adapter.forward_vanilla_grad(&tokenized)?;
        let pooled = output.pooled()?;

        let scalar = match &reference {
            Some(reference) => inner_product(&pooled, reference)?,
            None => pooled.sum_all().map_err(tensor_err("pooled sum"))?,
        };
        let grads = scalar.backward().map_err(tensor_err("gradient backward"))?;
        let grad = grads
            .get(leaf.as_tensor())
            .ok_or_else(|| AttributionError::Tensor {
                message: "no gradient reached the embedding leaf".to_string(),
            })?;

        let importance = saliency(grad)?;

        tracing::debug!(
            target: "attribution_engine::methods",
            method = "gradient",
            contrastive = reference.is_some(),
            tokens = importance.len(),
            "Gradient importance computed"
        );

        Ok(Attribution::new(Method::Gradient, &tokenized, importance))
    }
}
