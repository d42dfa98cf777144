//! Mode-switching view of a shared encoder.
//!
//! Each attribution call builds its own `EncoderAdapter` over an
//! `Arc<BertEncoder>`. The adapter exposes one forward shape per mode:
//!
//! | Mode | Forward | Returns |
//! |------|---------|---------|
//! | `None` | [`EncoderAdapter::encode`] | pooled + token states, attentions optional |
//! | `VanillaGrad` | [`EncoderAdapter::forward_vanilla_grad`] | output + embedding leaf |
//! | `Integrad` | [`EncoderAdapter::forward_integrad`] | sum of pooled components per row |
//! | `IntegradFromSimilarity` | [`EncoderAdapter::forward_integrad_from_similarity`] | pooled · reference per row |
//!
//! Modes are entered only from `None` and left by dropping the returned
//! [`ModeGuard`], so the adapter is back in `None` on every exit path.

use std::cell::Cell;
use std::sync::Arc;

use candle_core::{Tensor, Var, D};
use serde::Serialize;

use crate::encoder::{BertEncoder, EncoderOutput};
use crate::error::{tensor_err, AttributionError, AttributionResult};
use crate::tokenize::{TokenBatch, TokenizedText};

/// Forward behavior of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    None,
    VanillaGrad,
    Integrad,
    IntegradFromSimilarity,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::VanillaGrad => "vanilla_grad",
            Mode::Integrad => "integrad",
            Mode::IntegradFromSimilarity => "integrad_from_similarity",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request encoder adapter. Not `Sync`: one adapter, one request.
#[derive(Debug)]
pub struct EncoderAdapter {
    encoder: Arc<BertEncoder>,
    mode: Cell<Mode>,
}

/// Resets the adapter to `Mode::None` when dropped.
#[must_use = "dropping the guard immediately leaves the mode"]
#[derive(Debug)]
pub struct ModeGuard<'a> {
    mode: &'a Cell<Mode>,
    entered: Mode,
}

impl ModeGuard<'_> {
    pub fn mode(&self) -> Mode {
        self.entered
    }
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            target: "attribution_engine::adapter",
            mode = %self.entered,
            "Leaving adapter mode"
        );
        self.mode.set(Mode::None);
    }
}

impl EncoderAdapter {
    pub fn new(encoder: Arc<BertEncoder>) -> Self {
        Self {
            encoder,
            mode: Cell::new(Mode::None),
        }
    }

    pub fn encoder(&self) -> &BertEncoder {
        &self.encoder
    }

    /// Current mode. `None` outside of any method invocation.
    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    /// Switch to `mode` for the lifetime of the returned guard.
    ///
    /// # Errors
    /// `StaleModeState` if the adapter is not in `None`.
    pub fn enter(&self, mode: Mode) -> AttributionResult<ModeGuard<'_>> {
        self.require(Mode::None)?;
        tracing::trace!(
            target: "attribution_engine::adapter",
            mode = %mode,
            "Entering adapter mode"
        );
        self.mode.set(mode);
        Ok(ModeGuard {
            mode: &self.mode,
            entered: mode,
        })
    }

    fn require(&self, expected: Mode) -> AttributionResult<()> {
        let actual = self.mode.get();
        if actual != expected {
            return Err(AttributionError::StaleModeState { expected, actual });
        }
        Ok(())
    }

    /// Embedding-layer output. Mode-independent; carries no gradient.
    pub fn embed(&self, input_ids: &Tensor) -> AttributionResult<Tensor> {
        self.encoder.embed(input_ids)
    }

    /// Plain forward pass of one sentence (`Mode::None`).
    pub fn encode(
        &self,
        tokenized: &TokenizedText,
        capture_attentions: bool,
    ) -> AttributionResult<EncoderOutput> {
        self.require(Mode::None)?;
        let device = self.encoder.device();
        self.encoder.forward(
            &tokenized.input_ids(device)?,
            &tokenized.attention_mask(device)?,
            capture_attentions,
        )
    }

    /// Plain forward pass of a padded batch (`Mode::None`).
    pub fn encode_batch(&self, batch: &TokenBatch) -> AttributionResult<EncoderOutput> {
        self.require(Mode::None)?;
        self.encoder
            .forward(&batch.input_ids, &batch.attention_mask, false)
    }

    /// Pooled encoding `[hidden]` of one sentence (`Mode::None`).
    pub fn pooled(&self, tokenized: &TokenizedText) -> AttributionResult<Tensor> {
        self.encode(tokenized, false)?
            .pooled()?
            .squeeze(0)
            .map_err(tensor_err("pooled squeeze"))
    }

    /// Forward from a differentiable embedding leaf (`Mode::VanillaGrad`).
    ///
    /// Backpropagating from any scalar derived from the output fills the
    /// returned leaf's gradient.
    pub fn forward_vanilla_grad(
        &self,
        tokenized: &TokenizedText,
    ) -> AttributionResult<(EncoderOutput, Var)> {
        self.require(Mode::VanillaGrad)?;
        let device = self.encoder.device();
        let embeddings = self.encoder.embed(&tokenized.input_ids(device)?)?;
        let leaf = Var::from_tensor(&embeddings).map_err(tensor_err("embedding leaf"))?;
        let output = self.encoder.forward_embeddings(
            leaf.as_tensor(),
            &tokenized.attention_mask(device)?,
            false,
        )?;
        Ok((output, leaf))
    }

    /// Sum of pooled components per row (`Mode::Integrad`).
    ///
    /// `embeddings` is `[rows, seq_len, hidden]`; returns `[rows]`.
    pub fn forward_integrad(
        &self,
        embeddings: &Tensor,
        attention_mask: &Tensor,
    ) -> AttributionResult<Tensor> {
        self.require(Mode::Integrad)?;
        self.encoder
            .forward_embeddings(embeddings, attention_mask, false)?
            .pooled()?
            .sum(D::Minus1)
            .map_err(tensor_err("integrad pooled sum"))
    }

    /// Inner product of the pooled encoding with `reference` per row
    /// (`Mode::IntegradFromSimilarity`).
    ///
    /// `reference` is `[hidden]`; returns `[rows]`.
    pub fn forward_integrad_from_similarity(
        &self,
        embeddings: &Tensor,
        attention_mask: &Tensor,
        reference: &Tensor,
    ) -> AttributionResult<Tensor> {
        self.require(Mode::IntegradFromSimilarity)?;
        let pooled = self
            .encoder
            .forward_embeddings(embeddings, attention_mask, false)?
            .pooled()?;
        pooled
            .broadcast_mul(reference)
            .map_err(tensor_err("reference product"))?
            .sum(D::Minus1)
            .map_err(tensor_err("reference sum"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display_is_snake_case() {
        assert_eq!(Mode::None.to_string(), "none");
        assert_eq!(Mode::VanillaGrad.to_string(), "vanilla_grad");
        assert_eq!(
            Mode::IntegradFromSimilarity.to_string(),
            "integrad_from_similarity"
        );
    }

    #[test]
    fn test_guard_resets_on_drop() {
        let cell = Cell::new(Mode::Integrad);
        {
            let _guard = ModeGuard {
                mode: &cell,
                entered: Mode::Integrad,
            };
            assert_eq!(cell.get(), Mode::Integrad);
        }
        assert_eq!(cell.get(), Mode::None);
    }
}
