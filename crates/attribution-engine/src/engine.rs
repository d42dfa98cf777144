//! Attribution engine: shared model, per-call adapter.

use std::path::Path;
use std::sync::Arc;

use candle_core::Device;

use crate::adapter::EncoderAdapter;
use crate::config::AttributionConfig;
use crate::encoder::BertEncoder;
use crate::error::{tensor_err, AttributionResult};
use crate::methods::{Attribution, AttributionTarget, Method, MethodContext};
use crate::relation::{self, IntegradRelation, Token2TokenRelation};
use crate::tokenize::SentenceTokenizer;

/// Encoder and tokenizer shared read-only across calls.
///
/// Every call builds its own [`EncoderAdapter`], so concurrent calls never
/// observe each other's mode.
#[derive(Debug, Clone)]
pub struct AttributionEngine {
    encoder: Arc<BertEncoder>,
    tokenizer: Arc<SentenceTokenizer>,
    config: AttributionConfig,
}

impl AttributionEngine {
    /// # Errors
    /// `Config` if `config` fails validation.
    pub fn new(
        encoder: Arc<BertEncoder>,
        tokenizer: Arc<SentenceTokenizer>,
        config: AttributionConfig,
    ) -> AttributionResult<Self> {
        config.validate()?;
        Ok(Self {
            encoder,
            tokenizer,
            config,
        })
    }

    /// Load `config.json`, `model.safetensors` and `tokenizer.json` from
    /// `model_dir` onto the CPU.
    pub fn load(model_dir: &Path, config: AttributionConfig) -> AttributionResult<Self> {
        let encoder = BertEncoder::load(model_dir, &Device::Cpu)?;
        let tokenizer = SentenceTokenizer::from_file(model_dir.join("tokenizer.json"))?;
        Self::new(Arc::new(encoder), Arc::new(tokenizer), config)
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Arc<BertEncoder> {
        &self.encoder
    }

    pub fn tokenizer(&self) -> &SentenceTokenizer {
        &self.tokenizer
    }

    /// Fresh adapter over the shared encoder.
    pub fn adapter(&self) -> EncoderAdapter {
        EncoderAdapter::new(Arc::clone(&self.encoder))
    }

    /// Method context over a caller-owned adapter.
    pub fn context<'a>(&'a self, adapter: &'a EncoderAdapter) -> MethodContext<'a> {
        MethodContext::new(adapter, &self.tokenizer, &self.config)
    }

    /// Pooled encoding of `text` under the classifier token limit.
    pub fn encode(&self, text: &str) -> AttributionResult<Vec<f32>> {
        let adapter = self.adapter();
        let tokenized = self
            .tokenizer
            .tokenize(text, self.config.classifier.max_tokens)?;
        adapter
            .pooled(&tokenized)?
            .to_vec1()
            .map_err(tensor_err("encoding to vec"))
    }

    /// Per-token importance of `text` under `method`.
    pub fn importance(
        &self,
        method: Method,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution> {
        let adapter = self.adapter();
        self.importance_with(&adapter, method, text, target)
    }

    /// [`Self::importance`] on a caller-owned adapter.
    pub fn importance_with(
        &self,
        adapter: &EncoderAdapter,
        method: Method,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Attribution> {
        tracing::debug!(
            target: "attribution_engine::engine",
            method = %method,
            contrastive = target.reference.is_some(),
            support = target.support_set.map_or(0, |s| s.len()),
            "Computing importance"
        );
        method
            .implementation()
            .explain(&self.context(adapter), text, target)
    }

    /// Every method on the same text, in [`Method::ALL`] order.
    pub fn importances_all(
        &self,
        text: &str,
        target: &AttributionTarget<'_>,
    ) -> AttributionResult<Vec<Attribution>> {
        let adapter = self.adapter();
        Method::ALL
            .iter()
            .map(|&method| self.importance_with(&adapter, method, text, target))
            .collect()
    }

    pub fn token2token(&self, text1: &str, text2: &str) -> AttributionResult<Token2TokenRelation> {
        let adapter = self.adapter();
        relation::token2token(&self.context(&adapter), text1, text2)
    }

    pub fn integrad_relation(&self, text1: &str, text2: &str) -> AttributionResult<IntegradRelation> {
        let adapter = self.adapter();
        relation::integrad(&self.context(&adapter), text1, text2)
    }
}
