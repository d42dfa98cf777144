//! Error types for attribution operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::adapter::Mode;

/// Attribution-specific errors.
///
/// Every variant surfaces to the caller unchanged. Nothing is retried and no
/// method is ever substituted for another on failure.
#[derive(Debug, Error)]
pub enum AttributionError {
    /// An unrecognized method or relation type was requested.
    #[error("Invalid method '{name}'. Valid values: {valid:?}")]
    InvalidMethod {
        name: String,
        valid: &'static [&'static str],
    },

    /// A method that needs a support set or reference was invoked without one.
    #[error("Method '{method}' requires a support set")]
    MissingSupportSet { method: &'static str },

    /// The encoder adapter was used outside the mode the call expects.
    #[error("Encoder adapter is in mode {actual}, expected {expected}")]
    StaleModeState { expected: Mode, actual: Mode },

    /// The input produced no content tokens.
    #[error("Input text produced no tokens")]
    EmptyInput,

    /// Tensor operation failed.
    #[error("Tensor operation failed: {message}")]
    Tensor { message: String },

    /// Tokenizer failed to load or encode.
    #[error("Tokenization failed: {message}")]
    Tokenization { message: String },

    /// Model files missing or unreadable.
    #[error("Failed to load model from {}: {message}", path.display())]
    ModelLoad { path: PathBuf, message: String },

    /// Configuration invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Dataset lookup failed.
    #[error("Dataset error: {message}")]
    Dataset { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for attribution operations.
pub type AttributionResult<T> = Result<T, AttributionError>;

/// Attach operation context to a candle error.
pub(crate) fn tensor_err(context: &'static str) -> impl Fn(candle_core::Error) -> AttributionError {
    move |e| AttributionError::Tensor {
        message: format!("{}: {}", context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_method_lists_valid_names() {
        let err = AttributionError::InvalidMethod {
            name: "shap".to_string(),
            valid: &["attention", "lime"],
        };
        let msg = err.to_string();
        assert!(msg.contains("shap"));
        assert!(msg.contains("attention"));
    }

    #[test]
    fn test_tensor_err_keeps_context() {
        let mapped = tensor_err("pooled narrow")(candle_core::Error::Msg("boom".into()));
        match mapped {
            AttributionError::Tensor { message } => {
                assert!(message.starts_with("pooled narrow"));
                assert!(message.contains("boom"));
            }
            other => panic!("Expected Tensor error, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_mode_display() {
        let err = AttributionError::StaleModeState {
            expected: Mode::None,
            actual: Mode::VanillaGrad,
        };
        assert_eq!(
            err.to_string(),
            "Encoder adapter is in mode vanilla_grad, expected none"
        );
    }
}
