//! WordPiece tokenization with explicit boundary tokens and truncation.
//!
//! Boundary tokens are added here rather than by the tokenizer's
//! post-processor so every caller sees the same layout:
//! `[CLS] content... [SEP]`, content cut to `max_tokens - 2`.

use std::path::Path;

use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::diagnostics::Diagnostic;
use crate::error::{tensor_err, AttributionError, AttributionResult};

/// Marker prefixed to word pieces that continue a word.
pub const CONTINUATION_PREFIX: &str = "##";

const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";
const PAD_TOKEN: &str = "[PAD]";
const MASK_TOKEN: &str = "[MASK]";

/// One sentence, tokenized and truncated.
#[derive(Debug, Clone)]
pub struct TokenizedText {
    /// Token ids, boundary tokens included.
    pub ids: Vec<u32>,
    /// Token strings, boundary tokens included.
    pub tokens: Vec<String>,
    /// Byte span of each content token in the source text.
    pub offsets: Vec<(usize, usize)>,
    /// Content tokens before truncation.
    pub original_len: usize,
}

impl TokenizedText {
    /// Sequence length including boundary tokens.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn content_len(&self) -> usize {
        self.ids.len().saturating_sub(2)
    }

    /// Token strings with boundary tokens removed.
    pub fn content_tokens(&self) -> Vec<String> {
        strip_boundary(&self.tokens)
    }

    /// `Truncated` diagnostic when content was dropped.
    pub fn truncation(&self) -> Option<Diagnostic> {
        (self.original_len > self.content_len()).then(|| Diagnostic::Truncated {
            original: self.original_len,
            kept: self.content_len(),
        })
    }

    /// Input ids as a `[1, seq_len]` tensor.
    pub fn input_ids(&self, device: &Device) -> AttributionResult<Tensor> {
        Tensor::from_slice(&self.ids, (1, self.ids.len()), device)
            .map_err(tensor_err("input_ids tensor"))
    }

    /// All-ones attention mask as a `[1, seq_len]` tensor.
    pub fn attention_mask(&self, device: &Device) -> AttributionResult<Tensor> {
        Tensor::ones((1, self.ids.len()), candle_core::DType::F32, device)
            .map_err(tensor_err("attention_mask tensor"))
    }
}

/// Several sentences padded to the longest member.
#[derive(Debug)]
pub struct TokenBatch {
    /// `[batch, seq_len]` u32 ids.
    pub input_ids: Tensor,
    /// `[batch, seq_len]` f32 mask, 1.0 on real tokens.
    pub attention_mask: Tensor,
    /// Unpadded length of each row.
    pub lengths: Vec<usize>,
}

/// Remove the first and last element (the boundary positions).
pub(crate) fn strip_boundary<T: Clone>(values: &[T]) -> Vec<T> {
    if values.len() < 2 {
        return Vec::new();
    }
    values[1..values.len() - 1].to_vec()
}

/// Wrapper over a HuggingFace WordPiece tokenizer.
pub struct SentenceTokenizer {
    inner: Tokenizer,
    cls_id: u32,
    sep_id: u32,
    pad_id: u32,
}

impl std::fmt::Debug for SentenceTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceTokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("cls_id", &self.cls_id)
            .field("sep_id", &self.sep_id)
            .field("pad_id", &self.pad_id)
            .finish()
    }
}

impl SentenceTokenizer {
    /// Load `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>) -> AttributionResult<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path).map_err(|e| AttributionError::Tokenization {
            message: format!("Tokenizer load failed at {}: {}", path.display(), e),
        })?;
        Self::from_tokenizer(inner)
    }

    /// Wrap an existing tokenizer. Padding configured in the file is disabled;
    /// batches are padded explicitly.
    pub fn from_tokenizer(mut inner: Tokenizer) -> AttributionResult<Self> {
        inner.with_padding(None);

        let lookup = |token: &str| {
            inner
                .token_to_id(token)
                .ok_or_else(|| AttributionError::Tokenization {
                    message: format!("Vocabulary has no {} token", token),
                })
        };
        let cls_id = lookup(CLS_TOKEN)?;
        let sep_id = lookup(SEP_TOKEN)?;
        let pad_id = lookup(PAD_TOKEN)?;
        lookup(MASK_TOKEN)?;

        Ok(Self {
            inner,
            cls_id,
            sep_id,
            pad_id,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// String substituted for removed units in perturbed sentences.
    pub fn mask_token(&self) -> &'static str {
        MASK_TOKEN
    }

    /// Tokenize one sentence to at most `max_tokens` positions.
    ///
    /// # Errors
    /// - `AttributionError::EmptyInput` if the text has no content tokens
    /// - `AttributionError::Tokenization` if the tokenizer fails
    pub fn tokenize(&self, text: &str, max_tokens: usize) -> AttributionResult<TokenizedText> {
        let encoding =
            self.inner
                .encode(text, false)
                .map_err(|e| AttributionError::Tokenization {
                    message: format!("Encoding '{}' failed: {}", text, e),
                })?;

        let original_len = encoding.get_ids().len();
        if original_len == 0 {
            return Err(AttributionError::EmptyInput);
        }

        let keep = original_len.min(max_tokens.saturating_sub(2));
        if keep < original_len {
            tracing::debug!(
                target: "attribution_engine::tokenize",
                original = original_len,
                kept = keep,
                "Input truncated to token limit"
            );
        }

        let mut ids = Vec::with_capacity(keep + 2);
        ids.push(self.cls_id);
        ids.extend_from_slice(&encoding.get_ids()[..keep]);
        ids.push(self.sep_id);

        let mut tokens = Vec::with_capacity(keep + 2);
        tokens.push(CLS_TOKEN.to_string());
        tokens.extend(encoding.get_tokens()[..keep].iter().cloned());
        tokens.push(SEP_TOKEN.to_string());

        Ok(TokenizedText {
            ids,
            tokens,
            offsets: encoding.get_offsets()[..keep].to_vec(),
            original_len,
        })
    }

    /// Tokenize and pad several sentences into one batch.
    pub fn batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        max_tokens: usize,
        device: &Device,
    ) -> AttributionResult<TokenBatch> {
        let tokenized = texts
            .iter()
            .map(|t| self.tokenize(t.as_ref(), max_tokens))
            .collect::<AttributionResult<Vec<_>>>()?;
        self.pad(&tokenized, device)
    }

    /// Pad already tokenized sentences to the longest one.
    pub fn pad(&self, tokenized: &[TokenizedText], device: &Device) -> AttributionResult<TokenBatch> {
        let batch_size = tokenized.len();
        let seq_len = tokenized.iter().map(TokenizedText::len).max().unwrap_or(0);

        let mut ids = Vec::with_capacity(batch_size * seq_len);
        let mut mask = Vec::with_capacity(batch_size * seq_len);
        for t in tokenized {
            ids.extend_from_slice(&t.ids);
            ids.extend(std::iter::repeat(self.pad_id).take(seq_len - t.len()));
            mask.extend(std::iter::repeat(1.0f32).take(t.len()));
            mask.extend(std::iter::repeat(0.0f32).take(seq_len - t.len()));
        }

        let input_ids = Tensor::from_vec(ids, (batch_size, seq_len), device)
            .map_err(tensor_err("batch input_ids tensor"))?;
        let attention_mask = Tensor::from_vec(mask, (batch_size, seq_len), device)
            .map_err(tensor_err("batch attention_mask tensor"))?;

        Ok(TokenBatch {
            input_ids,
            attention_mask,
            lengths: tokenized.iter().map(TokenizedText::len).collect(),
        })
    }
}
