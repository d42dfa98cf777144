//! Root configuration for the attribution engine.
//!
//! # TOML Structure
//!
//! ```toml
//! [encoder]
//! max_tokens = 30
//!
//! [classifier]
//! tau = 15.0
//! batch_size = 8
//! max_tokens = 50
//!
//! [perturbation]
//! num_samples = 100
//! num_features = 100
//! seed = 42
//!
//! [integrated]
//! n_steps = 50
//! baseline = "pad_tokens"
//!
//! [models]
//! models_dir = "./models"
//! ```
//!
//! Invalid values are rejected by `validate()`; nothing is silently clamped.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, AttributionResult};

// ============================================================================
// ENCODER CONFIG
// ============================================================================

/// Input shaping shared by every attribution method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Maximum sequence length including the two boundary tokens.
    /// Longer inputs are truncated and flagged with a `Truncated` diagnostic.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_max_tokens() -> usize {
    30
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> AttributionResult<()> {
        if self.max_tokens < 3 {
            return Err(AttributionError::Config {
                message: format!(
                    "max_tokens must leave room for boundary tokens (>= 3), got {}",
                    self.max_tokens
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CLASSIFIER CONFIG
// ============================================================================

/// Similarity classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Temperature dividing inner-product similarities before softmax.
    #[serde(default = "default_tau")]
    pub tau: f64,

    /// Texts encoded per forward call.
    #[serde(default = "default_classifier_batch_size")]
    pub batch_size: usize,

    /// Truncation length for classifier inputs and support-set texts.
    #[serde(default = "default_classifier_max_tokens")]
    pub max_tokens: usize,
}

fn default_tau() -> f64 {
    15.0
}

fn default_classifier_batch_size() -> usize {
    8
}

fn default_classifier_max_tokens() -> usize {
    50
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tau: default_tau(),
            batch_size: default_classifier_batch_size(),
            max_tokens: default_classifier_max_tokens(),
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> AttributionResult<()> {
        if !self.tau.is_finite() || self.tau <= 0.0 {
            return Err(AttributionError::Config {
                message: format!("tau must be a positive finite number, got {}", self.tau),
            });
        }
        if self.batch_size == 0 {
            return Err(AttributionError::Config {
                message: "classifier batch_size must be > 0".to_string(),
            });
        }
        if self.max_tokens < 3 {
            return Err(AttributionError::Config {
                message: format!("classifier max_tokens must be >= 3, got {}", self.max_tokens),
            });
        }
        Ok(())
    }
}

// ============================================================================
// PERTURBATION CONFIG
// ============================================================================

/// Surrogate explainer settings for the perturbation method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerturbationConfig {
    /// Perturbed variants per explanation, the unperturbed sentence included.
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,

    /// Maximum number of units kept in the surrogate model.
    #[serde(default = "default_num_features")]
    pub num_features: usize,

    /// Width of the exponential kernel over cosine distance (x100).
    #[serde(default = "default_kernel_width")]
    pub kernel_width: f64,

    /// Ridge penalty of the feature-selection fit.
    #[serde(default = "default_selection_alpha")]
    pub selection_alpha: f64,

    /// Ridge penalty of the final surrogate fit.
    #[serde(default = "default_ridge_alpha")]
    pub ridge_alpha: f64,

    /// Seed for mask sampling. `None` draws a fresh seed per call.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_num_samples() -> usize {
    100
}

fn default_num_features() -> usize {
    100
}

fn default_kernel_width() -> f64 {
    25.0
}

fn default_selection_alpha() -> f64 {
    0.01
}

fn default_ridge_alpha() -> f64 {
    1.0
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            num_samples: default_num_samples(),
            num_features: default_num_features(),
            kernel_width: default_kernel_width(),
            selection_alpha: default_selection_alpha(),
            ridge_alpha: default_ridge_alpha(),
            seed: None,
        }
    }
}

impl PerturbationConfig {
    pub fn validate(&self) -> AttributionResult<()> {
        if self.num_samples < 2 {
            return Err(AttributionError::Config {
                message: format!("num_samples must be >= 2, got {}", self.num_samples),
            });
        }
        if self.num_features == 0 {
            return Err(AttributionError::Config {
                message: "num_features must be > 0".to_string(),
            });
        }
        if !(self.kernel_width > 0.0) {
            return Err(AttributionError::Config {
                message: format!("kernel_width must be > 0, got {}", self.kernel_width),
            });
        }
        if !(self.selection_alpha > 0.0 && self.ridge_alpha > 0.0) {
            return Err(AttributionError::Config {
                message: format!(
                    "ridge penalties must be > 0, got selection_alpha={} ridge_alpha={}",
                    self.selection_alpha, self.ridge_alpha
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// INTEGRATED GRADIENTS CONFIG
// ============================================================================

/// Starting point of the integration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// Embedding-layer output for an all-`[PAD]` input of the same length.
    #[default]
    PadTokens,
    /// All-zero embedding tensor.
    Zeros,
}

impl BaselineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineKind::PadTokens => "pad_tokens",
            BaselineKind::Zeros => "zeros",
        }
    }
}

/// Integrated-gradients settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedConfig {
    /// Interpolation points, both endpoints included.
    #[serde(default = "default_n_steps")]
    pub n_steps: usize,

    /// Interpolated rows forwarded per backward pass.
    #[serde(default = "default_internal_batch_size")]
    pub internal_batch_size: usize,

    #[serde(default)]
    pub baseline: BaselineKind,

    /// Relative completeness tolerance; larger deltas raise a diagnostic.
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f32,
}

fn default_n_steps() -> usize {
    50
}

fn default_internal_batch_size() -> usize {
    25
}

fn default_convergence_tolerance() -> f32 {
    1e-2
}

impl Default for IntegratedConfig {
    fn default() -> Self {
        Self {
            n_steps: default_n_steps(),
            internal_batch_size: default_internal_batch_size(),
            baseline: BaselineKind::default(),
            convergence_tolerance: default_convergence_tolerance(),
        }
    }
}

impl IntegratedConfig {
    pub fn validate(&self) -> AttributionResult<()> {
        if self.n_steps < 2 {
            return Err(AttributionError::Config {
                message: format!("n_steps must be >= 2, got {}", self.n_steps),
            });
        }
        if self.internal_batch_size == 0 {
            return Err(AttributionError::Config {
                message: "internal_batch_size must be > 0".to_string(),
            });
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(AttributionError::Config {
                message: format!(
                    "convergence_tolerance must be > 0, got {}",
                    self.convergence_tolerance
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// MODELS CONFIG
// ============================================================================

/// Where checkpoints live. One sub-directory per dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
}

fn default_models_dir() -> String {
    "./models".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
        }
    }
}

impl ModelsConfig {
    pub fn validate(&self) -> AttributionResult<()> {
        if self.models_dir.is_empty() {
            return Err(AttributionError::Config {
                message: "models_dir cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ROOT CONFIG
// ============================================================================

/// Root configuration for the attribution engine.
///
/// ```rust,ignore
/// let config = AttributionConfig::from_file("attribution.toml")?
///     .with_env_overrides();
/// config.validate()?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub perturbation: PerturbationConfig,

    #[serde(default)]
    pub integrated: IntegratedConfig,

    #[serde(default)]
    pub models: ModelsConfig,
}

impl AttributionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - `AttributionError::Config` if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> AttributionResult<Self> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path).map_err(|e| AttributionError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        toml::from_str(&contents).map_err(|e| AttributionError::Config {
            message: format!("Failed to parse TOML in '{}': {}", path.display(), e),
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> AttributionResult<Self> {
        toml::from_str(toml).map_err(|e| AttributionError::Config {
            message: format!("Failed to parse TOML: {}", e),
        })
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> AttributionResult<String> {
        toml::to_string_pretty(self).map_err(|e| AttributionError::Config {
            message: format!("Failed to serialize to TOML: {}", e),
        })
    }

    /// Validate every section, returning the first error found.
    pub fn validate(&self) -> AttributionResult<()> {
        self.encoder.validate().map_err(|e| AttributionError::Config {
            message: format!("[encoder] {}", e),
        })?;
        self.classifier.validate().map_err(|e| AttributionError::Config {
            message: format!("[classifier] {}", e),
        })?;
        self.perturbation.validate().map_err(|e| AttributionError::Config {
            message: format!("[perturbation] {}", e),
        })?;
        self.integrated.validate().map_err(|e| AttributionError::Config {
            message: format!("[integrated] {}", e),
        })?;
        self.models.validate().map_err(|e| AttributionError::Config {
            message: format!("[models] {}", e),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// | Variable | Field | Type |
    /// |----------|-------|------|
    /// | `ATTRIBUTION_MODELS_DIR` | `models.models_dir` | String |
    /// | `ATTRIBUTION_MAX_TOKENS` | `encoder.max_tokens` | usize |
    /// | `ATTRIBUTION_TAU` | `classifier.tau` | f64 |
    /// | `ATTRIBUTION_BATCH_SIZE` | `classifier.batch_size` | usize |
    /// | `ATTRIBUTION_NUM_SAMPLES` | `perturbation.num_samples` | usize |
    /// | `ATTRIBUTION_SEED` | `perturbation.seed` | u64 |
    /// | `ATTRIBUTION_IG_STEPS` | `integrated.n_steps` | usize |
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("ATTRIBUTION_MODELS_DIR") {
            self.models.models_dir = val;
        }
        if let Ok(val) = env::var("ATTRIBUTION_MAX_TOKENS") {
            if let Ok(n) = val.parse::<usize>() {
                self.encoder.max_tokens = n;
            }
        }
        if let Ok(val) = env::var("ATTRIBUTION_TAU") {
            if let Ok(t) = val.parse::<f64>() {
                self.classifier.tau = t;
            }
        }
        if let Ok(val) = env::var("ATTRIBUTION_BATCH_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                self.classifier.batch_size = n;
            }
        }
        if let Ok(val) = env::var("ATTRIBUTION_NUM_SAMPLES") {
            if let Ok(n) = val.parse::<usize>() {
                self.perturbation.num_samples = n;
            }
        }
        if let Ok(val) = env::var("ATTRIBUTION_SEED") {
            if let Ok(s) = val.parse::<u64>() {
                self.perturbation.seed = Some(s);
            }
        }
        if let Ok(val) = env::var("ATTRIBUTION_IG_STEPS") {
            if let Ok(n) = val.parse::<usize>() {
                self.integrated.n_steps = n;
            }
        }

        self
    }
}
