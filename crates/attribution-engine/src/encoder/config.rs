//! BERT configuration parsed from `config.json`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{AttributionError, AttributionResult};

/// Encoder hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BertConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden layer size.
    pub hidden_size: usize,
    /// Number of hidden layers.
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// Intermediate FFN size.
    pub intermediate_size: usize,
    /// Maximum position embeddings.
    pub max_position_embeddings: usize,
    /// Token type vocabulary size.
    pub type_vocab_size: usize,
    /// Layer normalization epsilon.
    pub layer_norm_eps: f64,
}

impl Default for BertConfig {
    /// bert-base-uncased.
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }
}

impl BertConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Normalization constant of attention importance.
    pub fn attention_units(&self) -> usize {
        self.num_hidden_layers * self.num_attention_heads
    }

    /// Check internal consistency.
    pub fn validate(&self) -> AttributionResult<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(AttributionError::Config {
                message: format!(
                    "hidden_size {} is not divisible by num_attention_heads {}",
                    self.hidden_size, self.num_attention_heads
                ),
            });
        }
        if self.num_hidden_layers == 0 {
            return Err(AttributionError::Config {
                message: "num_hidden_layers must be > 0".to_string(),
            });
        }
        if self.type_vocab_size == 0 {
            return Err(AttributionError::Config {
                message: "type_vocab_size must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Parse a HuggingFace `config.json`. Missing fields fall back to bert-base.
    pub fn from_json_str(json: &str) -> AttributionResult<Self> {
        #[derive(Deserialize)]
        struct RawConfig {
            vocab_size: Option<usize>,
            hidden_size: Option<usize>,
            num_hidden_layers: Option<usize>,
            num_attention_heads: Option<usize>,
            intermediate_size: Option<usize>,
            max_position_embeddings: Option<usize>,
            type_vocab_size: Option<usize>,
            #[serde(alias = "layer_norm_epsilon")]
            layer_norm_eps: Option<f64>,
        }

        let raw: RawConfig = serde_json::from_str(json).map_err(|e| AttributionError::Config {
            message: format!("BERT config parse failed: {}", e),
        })?;

        let base = Self::default();
        let config = Self {
            vocab_size: raw.vocab_size.unwrap_or(base.vocab_size),
            hidden_size: raw.hidden_size.unwrap_or(base.hidden_size),
            num_hidden_layers: raw.num_hidden_layers.unwrap_or(base.num_hidden_layers),
            num_attention_heads: raw.num_attention_heads.unwrap_or(base.num_attention_heads),
            intermediate_size: raw.intermediate_size.unwrap_or(base.intermediate_size),
            max_position_embeddings: raw
                .max_position_embeddings
                .unwrap_or(base.max_position_embeddings),
            type_vocab_size: raw.type_vocab_size.unwrap_or(base.type_vocab_size),
            layer_norm_eps: raw.layer_norm_eps.unwrap_or(base.layer_norm_eps),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `config.json` from a model directory.
    pub fn from_model_dir(model_dir: &Path) -> AttributionResult<Self> {
        let config_path = model_dir.join("config.json");
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| AttributionError::ModelLoad {
                path: config_path.clone(),
                message: e.to_string(),
            })?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config = BertConfig::from_json_str(
            r#"{"hidden_size": 256, "num_hidden_layers": 4, "num_attention_heads": 4,
                "intermediate_size": 1024, "architectures": ["BertModel"]}"#,
        )
        .unwrap();
        assert_eq!(config.hidden_size, 256);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.attention_units(), 16);
        assert_eq!(config.vocab_size, 30522);
        assert_eq!(config.layer_norm_eps, 1e-12);
    }

    #[test]
    fn test_reject_indivisible_heads() {
        let result = BertConfig::from_json_str(r#"{"hidden_size": 100, "num_attention_heads": 12}"#);
        assert!(matches!(result, Err(AttributionError::Config { .. })));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = BertConfig::from_model_dir(dir.path());
        assert!(matches!(result, Err(AttributionError::ModelLoad { .. })));
    }
}
