//! Per-token importance methods.
//!
//! Every method implements [`ImportanceMethod`] and is selected through the
//! [`Method`] enum. All of them tokenize with `encoder.max_tokens`, strip the
//! boundary tokens, and return exactly one score per returned token.

mod attention;
mod gradient;
mod integrated;
pub mod perturbation;

use std::str::FromStr;

use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

use crate::adapter::EncoderAdapter;
use crate::classifier::{SimilarityClassifier, SupportSet};
use crate::config::AttributionConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::tokenize::{strip_boundary, SentenceTokenizer, TokenizedText};

pub use attention::AttentionImportance;
pub use gradient::GradientImportance;
pub use integrated::{IntegratedGradients, IntegratedOutcome};
pub use perturbation::{PerturbationImportance, SurrogateSummary};

/// Importance algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Attention,
    Lime,
    Gradient,
    Integrad,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::Attention,
        Method::Lime,
        Method::Gradient,
        Method::Integrad,
    ];

    pub const NAMES: &'static [&'static str] = &["attention", "lime", "gradient", "integrad"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Attention => "attention",
            Method::Lime => "lime",
            Method::Gradient => "gradient",
            Method::Integrad => "integrad",
        }
    }

    /// The implementation behind this selector.
    pub fn implementation(&self) -> &'static dyn ImportanceMethod {
        match self {
            Method::Attention => &AttentionImportance,
            Method::Lime => &PerturbationImportance,
            Method::Gradient => &GradientImportance,
            Method::Integrad => &IntegratedGradients,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attention" => Ok(Method::Attention),
            "lime" => Ok(Method::Lime),
            "gradient" => Ok(Method::Gradient),
            "integrad" => Ok(Method::Integrad),
            other => Err(AttributionError::InvalidMethod {
                name: other.to_string(),
                valid: Self::NAMES,
            }),
        }
    }
}

/// What the importance is measured against.
///
/// `reference` turns gradient methods contrastive (target = similarity with
/// the reference). `support_set` is required by `lime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributionTarget<'a> {
    pub reference: Option<&'a str>,
    pub support_set: Option<&'a SupportSet>,
}

impl<'a> AttributionTarget<'a> {
    pub fn with_reference(mut self, reference: &'a str) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_support_set(mut self, support_set: &'a SupportSet) -> Self {
        self.support_set = Some(support_set);
        self
    }
}

/// Per-token importance of one sentence.
#[derive(Debug, Clone, Serialize)]
pub struct Attribution {
    pub method: Method,
    /// Content tokens, boundary tokens removed.
    pub tokens: Vec<String>,
    /// One score per entry of `tokens`.
    pub importance: Vec<f32>,
    /// Integrated gradients only: `sum(attribution) - (f(x) - f(x0))`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_delta: Option<f32>,
    /// Perturbation only: fit summary of the surrogate model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surrogate: Option<SurrogateSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl Attribution {
    pub(crate) fn new(method: Method, tokenized: &TokenizedText, importance: Vec<f32>) -> Self {
        Self {
            method,
            tokens: tokenized.content_tokens(),
            importance,
            convergence_delta: None,
            surrogate: None,
            diagnostics: tokenized.truncation().into_iter().collect(),
        }
    }
}

/// Borrowed collaborators shared by every method in one request.
#[derive(Clone, Copy)]
pub struct MethodContext<'a> {
    pub adapter: &'a EncoderAdapter,
    pub tokenizer: &'a SentenceTokenizer,
    pub config: &'a AttributionConfig,
}

impl<'a> MethodContext<'a> {
    pub fn new(
        adapter: &'a EncoderAdapter,
        tokenizer: &'a SentenceTokenizer,
        config: &'a AttributionConfig,
    ) -> Self {
        Self {
            adapter,
            tokenizer,
            config,
        }
    }

    /// Tokenize with the encoder token limit.
    pub fn tokenize(&self, text: &str) -> AttributionResult<TokenizedText> {
        self.tokenizer.tokenize(text, self.config.encoder.max_tokens)
    }

    pub fn classifier(&self) -> SimilarityClassifier<'a> {
        SimilarityClassifier::new(self.adapter, self.tokenizer, &self.config.classifier)
    }

    /// Pooled encoding `[hidden]` of a reference text, without gradient.
    pub fn reference_encoding(&self, reference: &str) -> AttributionResult<Tensor> {
        let tokenized = self.tokenize(reference)?;
        self.adapter.pooled(&tokenized)
    }
}

/// Compute per-token importance for a sentence, optionally against a
/// reference or support set.
pub trait ImportanceMethod: Send + Sync {
    fn method(&self) -> Method;

    fn explain(
        &self,
        ctx: &MethodContext<'_>,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution>;
}

/// `|grad|` summed over hidden for a `[1, seq_len, hidden]` gradient,
/// boundary positions removed.
pub(crate) fn saliency(grad: &Tensor) -> AttributionResult<Vec<f32>> {
    let per_token: Vec<f32> = grad
        .abs()
        .map_err(tensor_err("saliency abs"))?
        .sum(D::Minus1)
        .map_err(tensor_err("saliency hidden sum"))?
        .squeeze(0)
        .map_err(tensor_err("saliency squeeze"))?
        .to_vec1()
        .map_err(tensor_err("saliency to vec"))?;
    Ok(strip_boundary(&per_token))
}

/// Inner product of two `[hidden]` or `[1, hidden]` encodings as a scalar tensor.
pub(crate) fn inner_product(a: &Tensor, b: &Tensor) -> AttributionResult<Tensor> {
    a.flatten_all()
        .map_err(tensor_err("inner product flatten"))?
        .mul(&b.flatten_all().map_err(tensor_err("inner product flatten"))?)
        .map_err(tensor_err("inner product mul"))?
        .sum_all()
        .map_err(tensor_err("inner product sum"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_method_from_str() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
            assert_eq!(method.implementation().method(), method);
        }
    }

    #[test]
    fn test_invalid_method_rejected() {
        let err = "shap".parse::<Method>().unwrap_err();
        match err {
            AttributionError::InvalidMethod { name, valid } => {
                assert_eq!(name, "shap");
                assert_eq!(valid, Method::NAMES);
            }
            other => panic!("Expected InvalidMethod, got {:?}", other),
        }
    }

    #[test]
    fn test_saliency_strips_boundary() {
        let grad = Tensor::new(&[[[1.0f32, -1.0], [2.0, -0.5], [0.0, 3.0], [4.0, 4.0]]], &Device::Cpu)
            .unwrap();
        assert_eq!(saliency(&grad).unwrap(), vec![2.5, 3.0]);
    }

    #[test]
    fn test_inner_product() {
        let a = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[0.5f32, -1.0, 2.0]], &Device::Cpu).unwrap();
        let p: f32 = inner_product(&a, &b).unwrap().to_scalar().unwrap();
        assert!((p - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_method_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Method::Integrad).unwrap(), "\"integrad\"");
    }
}
