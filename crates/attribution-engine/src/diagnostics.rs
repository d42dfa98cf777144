//! Non-fatal conditions reported alongside attribution results.

use serde::{Deserialize, Serialize};

/// A lossy or numerically suspect condition observed while computing a result.
///
/// Diagnostics never abort a computation. They travel with the result so the
/// caller can decide how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Input exceeded the token limit and was cut to `kept` content tokens.
    Truncated { original: usize, kept: usize },

    /// Integrated-gradients completeness gap exceeded the tolerance.
    NumericalNonConvergence { delta: f32, tolerance: f32 },
}

impl Diagnostic {
    pub fn is_truncation(&self) -> bool {
        matches!(self, Diagnostic::Truncated { .. })
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Truncated { original, kept } => {
                write!(f, "input truncated from {} to {} tokens", original, kept)
            }
            Diagnostic::NumericalNonConvergence { delta, tolerance } => write!(
                f,
                "integrated gradients convergence delta {:.3e} exceeds tolerance {:.3e}",
                delta, tolerance
            ),
        }
    }
}
