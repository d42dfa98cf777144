//! Two-text relations: token-to-token links and bidirectional
//! integrated-gradients importance.

use std::str::FromStr;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::adapter::Mode;
use crate::diagnostics::Diagnostic;
use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::methods::{inner_product, saliency, IntegratedGradients, MethodContext};

/// Relation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Token2Token,
    Integrad,
}

impl RelationKind {
    pub const NAMES: &'static [&'static str] = &["token2token", "integrad"];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Token2Token => "token2token",
            RelationKind::Integrad => "integrad",
        }
    }
}

impl FromStr for RelationKind {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token2token" => Ok(RelationKind::Token2Token),
            "integrad" => Ok(RelationKind::Integrad),
            other => Err(AttributionError::InvalidMethod {
                name: other.to_string(),
                valid: Self::NAMES,
            }),
        }
    }
}

/// Token-to-token links plus gradient saliency of the pair similarity.
#[derive(Debug, Clone, Serialize)]
pub struct Token2TokenRelation {
    /// `links[i][j] = <h1_i, h2_j>` over content tokens.
    pub links: Vec<Vec<f32>>,
    pub tokens1: Vec<String>,
    pub tokens2: Vec<String>,
    /// `|d similarity / d embedding|` per token of text 1.
    pub importance1: Vec<f32>,
    pub importance2: Vec<f32>,
    /// Inner product of the pooled encodings.
    pub similarity: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Integrated gradients of each text against the other's encoding.
#[derive(Debug, Clone, Serialize)]
pub struct IntegradRelation {
    pub tokens1: Vec<String>,
    pub tokens2: Vec<String>,
    pub importance1: Vec<f32>,
    pub importance2: Vec<f32>,
    pub similarity: f32,
    /// Convergence deltas of the two runs.
    pub deltas: [f32; 2],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Both texts forwarded from embedding leaves; one backward pass from the
/// pooled similarity fills both leaves' gradients.
pub fn token2token(ctx: &MethodContext<'_>, text1: &str, text2: &str) -> AttributionResult<Token2TokenRelation> {
    let tokenized1 = ctx.tokenize(text1)?;
    let tokenized2 = ctx.tokenize(text2)?;

    let _guard = ctx.adapter.enter(Mode::VanillaGrad)?;
    let (output1, leaf1) = ctx.adapter.forward_vanilla_grad(&tokenized1)?;
    let (output2, leaf2) = ctx.adapter.forward_vanilla_grad(&tokenized2)?;

    let states1 = output1.content_states(0, tokenized1.len())?.detach();
    let states2 = output2.content_states(0, tokenized2.len())?.detach();
    let links = link_matrix(&states1, &states2)?;

    let similarity = inner_product(&output1.pooled()?, &output2.pooled()?)?;
    let grads = similarity.backward().map_err(tensor_err("similarity backward"))?;
    let missing = || AttributionError::Tensor {
        message: "no gradient reached an embedding leaf".to_string(),
    };
    let importance1 = saliency(grads.get(leaf1.as_tensor()).ok_or_else(missing)?)?;
    let importance2 = saliency(grads.get(leaf2.as_tensor()).ok_or_else(missing)?)?;
    let similarity: f32 = similarity.to_scalar().map_err(tensor_err("similarity scalar"))?;

    tracing::debug!(
        target: "attribution_engine::relation",
        kind = "token2token",
        rows = links.len(),
        cols = tokenized2.content_len(),
        similarity = similarity,
        "Token relation computed"
    );

    Ok(Token2TokenRelation {
        links,
        tokens1: tokenized1.content_tokens(),
        tokens2: tokenized2.content_tokens(),
        importance1,
        importance2,
        similarity,
        diagnostics: tokenized1
            .truncation()
            .into_iter()
            .chain(tokenized2.truncation())
            .collect(),
    })
}

/// IG on text 1 against text 2's pooled encoding, then the reverse.
pub fn integrad(ctx: &MethodContext<'_>, text1: &str, text2: &str) -> AttributionResult<IntegradRelation> {
    let tokenized1 = ctx.tokenize(text1)?;
    let tokenized2 = ctx.tokenize(text2)?;

    let encoding1 = ctx.adapter.pooled(&tokenized1)?;
    let encoding2 = ctx.adapter.pooled(&tokenized2)?;
    let similarity: f32 = inner_product(&encoding1, &encoding2)?
        .to_scalar()
        .map_err(tensor_err("similarity scalar"))?;

    let forward = IntegratedGradients::attribute(ctx, &tokenized1, Some(&encoding2))?;
    let backward = IntegratedGradients::attribute(ctx, &tokenized2, Some(&encoding1))?;

    tracing::debug!(
        target: "attribution_engine::relation",
        kind = "integrad",
        similarity = similarity,
        delta1 = forward.delta,
        delta2 = backward.delta,
        "Integrated gradients relation computed"
    );

    let diagnostics = tokenized1
        .truncation()
        .into_iter()
        .chain(tokenized2.truncation())
        .chain(forward.diagnostics)
        .chain(backward.diagnostics)
        .collect();

    Ok(IntegradRelation {
        tokens1: tokenized1.content_tokens(),
        tokens2: tokenized2.content_tokens(),
        importance1: forward.importance,
        importance2: backward.importance,
        similarity,
        deltas: [forward.delta, backward.delta],
        diagnostics,
    })
}

/// `[n, h] x [m, h] -> n x m` inner products.
fn link_matrix(states1: &Tensor, states2: &Tensor) -> AttributionResult<Vec<Vec<f32>>> {
    states1
        .matmul(&states2.t().map_err(tensor_err("links transpose"))?)
        .map_err(tensor_err("links matmul"))?
        .to_vec2()
        .map_err(tensor_err("links to vec"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_relation_kind_from_str() {
        assert_eq!("token2token".parse::<RelationKind>().unwrap(), RelationKind::Token2Token);
        assert_eq!("integrad".parse::<RelationKind>().unwrap(), RelationKind::Integrad);
        assert!(matches!(
            "attention".parse::<RelationKind>(),
            Err(AttributionError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn test_link_matrix_shape() {
        let a = Tensor::new(&[[1.0f32, 0.0], [0.0, 2.0], [1.0, 1.0]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[1.0f32, 1.0], [3.0, 0.0]], &Device::Cpu).unwrap();
        let links = link_matrix(&a, &b).unwrap();
        assert_eq!(links, vec![vec![1.0, 3.0], vec![2.0, 0.0], vec![2.0, 3.0]]);
    }
}
