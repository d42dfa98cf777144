//! Similarity classifier over a labeled support set.
//!
//! `p(j | x) = softmax_j(<enc(x), enc(s_j)> / tau)` where `enc` is the
//! pooled encoding. Rows of every result follow support-set order.

use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

use crate::adapter::EncoderAdapter;
use crate::config::ClassifierConfig;
use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::tokenize::SentenceTokenizer;

/// One labeled reference utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportExample {
    pub text: String,
    pub label: String,
}

impl SupportExample {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Ordered support set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportSet {
    pub examples: Vec<SupportExample>,
}

impl SupportSet {
    pub fn new(examples: Vec<SupportExample>) -> Self {
        Self { examples }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.examples.iter().map(|e| e.text.as_str()).collect()
    }
}

impl FromIterator<SupportExample> for SupportSet {
    fn from_iter<I: IntoIterator<Item = SupportExample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Support set with its pooled encodings.
#[derive(Debug)]
pub struct EncodedSupportSet {
    pub support: SupportSet,
    /// `[n, hidden]`, row `j` encodes `support.examples[j]`.
    pub encodings: Tensor,
}

impl EncodedSupportSet {
    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }
}

/// Temperature-scaled inner-product classifier.
pub struct SimilarityClassifier<'a> {
    adapter: &'a EncoderAdapter,
    tokenizer: &'a SentenceTokenizer,
    config: &'a ClassifierConfig,
}

impl<'a> SimilarityClassifier<'a> {
    pub fn new(
        adapter: &'a EncoderAdapter,
        tokenizer: &'a SentenceTokenizer,
        config: &'a ClassifierConfig,
    ) -> Self {
        Self {
            adapter,
            tokenizer,
            config,
        }
    }

    /// Pooled encodings `[n, hidden]`, encoded `batch_size` texts at a time.
    pub fn encode_texts<S: AsRef<str>>(&self, texts: &[S]) -> AttributionResult<Tensor> {
        let device = self.adapter.encoder().device();
        let mut chunks = Vec::with_capacity(texts.len().div_ceil(self.config.batch_size));
        for chunk in texts.chunks(self.config.batch_size) {
            let batch = self
                .tokenizer
                .batch(chunk, self.config.max_tokens, device)?;
            chunks.push(self.adapter.encode_batch(&batch)?.pooled()?);
        }
        if chunks.is_empty() {
            return Tensor::zeros(
                (0, self.adapter.encoder().hidden_size()),
                candle_core::DType::F32,
                device,
            )
            .map_err(tensor_err("empty encoding"));
        }
        Tensor::cat(&chunks, 0).map_err(tensor_err("encoding concat"))
    }

    /// Encode a support set once for repeated classification.
    ///
    /// # Errors
    /// `MissingSupportSet` if the set is empty.
    pub fn encode_support(&self, support: &SupportSet) -> AttributionResult<EncodedSupportSet> {
        if support.is_empty() {
            return Err(AttributionError::MissingSupportSet {
                method: "classifier",
            });
        }
        let encodings = self.encode_texts(&support.texts())?;
        Ok(EncodedSupportSet {
            support: support.clone(),
            encodings,
        })
    }

    /// Scaled similarity logits `[n_texts, n_support]`.
    fn logits(&self, encodings: &Tensor, support: &EncodedSupportSet) -> AttributionResult<Tensor> {
        let support_t = support
            .encodings
            .t()
            .map_err(tensor_err("support transpose"))?;
        (encodings
            .matmul(&support_t)
            .map_err(tensor_err("similarity matmul"))?
            / self.config.tau)
            .map_err(tensor_err("temperature scale"))
    }

    /// Probability over support members for every text.
    pub fn classify<S: AsRef<str>>(
        &self,
        texts: &[S],
        support: &EncodedSupportSet,
    ) -> AttributionResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self.encode_texts(texts)?;
        let logits = self.logits(&encodings, support)?;
        candle_nn::ops::softmax(&logits, D::Minus1)
            .map_err(tensor_err("similarity softmax"))?
            .to_vec2()
            .map_err(tensor_err("probabilities to vec"))
    }

    /// Index and raw inner product of the most similar support member.
    pub fn closest(&self, text: &str, support: &EncodedSupportSet) -> AttributionResult<(usize, f32)> {
        let encoding = self.encode_texts(&[text])?;
        let sims: Vec<f32> = encoding
            .matmul(&support.encodings.t().map_err(tensor_err("support transpose"))?)
            .map_err(tensor_err("similarity matmul"))?
            .squeeze(0)
            .map_err(tensor_err("similarity squeeze"))?
            .to_vec1()
            .map_err(tensor_err("similarity to vec"))?;
        argmax(&sims)
            .map(|i| (i, sims[i]))
            .ok_or(AttributionError::MissingSupportSet {
                method: "classifier",
            })
    }
}

/// Index of the largest value; first one wins ties. NaN is never selected
/// over a number.
pub(crate) fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if !(v > b) => best,
            _ if v.is_nan() => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, 0.3]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_support_set_collects_in_order() {
        let set: SupportSet = [("cancel my booking", "A"), ("track my package", "B")]
            .into_iter()
            .map(|(t, l)| SupportExample::new(t, l))
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.texts(), vec!["cancel my booking", "track my package"]);
        assert_eq!(set.examples[1].label, "B");
    }
}
