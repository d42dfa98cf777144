//! Dataset-indexed explanation operations.
//!
//! [`ExplainService`] resolves `(dataset, index)` pairs through a
//! [`DatasetProvider`], loads one engine per dataset through a
//! [`ModelLoader`], and returns serde payloads ready for a JSON boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::Device;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::classifier::{argmax, SupportExample, SupportSet};
use crate::config::AttributionConfig;
use crate::diagnostics::Diagnostic;
use crate::encoder::BertEncoder;
use crate::engine::AttributionEngine;
use crate::error::{AttributionError, AttributionResult};
use crate::methods::{Attribution, AttributionTarget, Method};
use crate::relation::{IntegradRelation, RelationKind, Token2TokenRelation};
use crate::tokenize::SentenceTokenizer;

// ============================================================================
// COLLABORATORS
// ============================================================================

/// One labeled utterance of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub text: String,
    pub category: String,
}

/// Precomputed support set of one example: dataset indices and their
/// similarity to the example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportSelection {
    pub indices: Vec<usize>,
    pub similarities: Vec<f32>,
}

/// Source of examples and support selections.
pub trait DatasetProvider: Send + Sync {
    /// # Errors
    /// `Dataset` if the dataset or index is unknown.
    fn example(&self, dataset: &str, index: usize) -> AttributionResult<Example>;

    /// `None` when no support set was precomputed for the example.
    fn support_selection(&self, dataset: &str, index: usize) -> AttributionResult<Option<SupportSelection>>;
}

/// Encoder and tokenizer of one dataset.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub encoder: Arc<BertEncoder>,
    pub tokenizer: Arc<SentenceTokenizer>,
}

/// Source of per-dataset models.
pub trait ModelLoader: Send + Sync {
    fn load(&self, dataset: &str) -> AttributionResult<LoadedModel>;
}

/// Reads `<models_dir>/<dataset>/{config.json, model.safetensors, tokenizer.json}`.
#[derive(Debug, Clone)]
pub struct DirectoryModelLoader {
    models_dir: PathBuf,
    device: Device,
}

impl DirectoryModelLoader {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            device: Device::Cpu,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }
}

impl ModelLoader for DirectoryModelLoader {
    fn load(&self, dataset: &str) -> AttributionResult<LoadedModel> {
        let model_dir = self.models_dir.join(dataset);
        if !model_dir.is_dir() {
            tracing::error!(
                target: "attribution_engine::service",
                dataset = dataset,
                path = %model_dir.display(),
                "Model directory not found. Expected config.json, model.safetensors \
                 and tokenizer.json under <models_dir>/<dataset>/"
            );
            return Err(AttributionError::ModelLoad {
                path: model_dir,
                message: "model directory does not exist".to_string(),
            });
        }
        let encoder = BertEncoder::load(&model_dir, &self.device)?;
        let tokenizer = SentenceTokenizer::from_file(model_dir.join("tokenizer.json"))?;
        Ok(LoadedModel {
            encoder: Arc::new(encoder),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct EncodeResponse {
    pub encoding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportanceResponse {
    pub importance: Vec<f32>,
    pub tokens: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl From<Attribution> for ImportanceResponse {
    fn from(attribution: Attribution) -> Self {
        Self {
            importance: attribution.importance,
            tokens: attribution.tokens,
            diagnostics: attribution.diagnostics,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportancesAllResponse {
    pub tokens: Vec<String>,
    pub attn_importance: Vec<f32>,
    pub lime_importance: Vec<f32>,
    pub grad_importance: Vec<f32>,
    pub integrad_importance: Vec<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RelationResponse {
    Token2Token(Token2TokenRelation),
    Integrad(IntegradRelation),
}

// ============================================================================
// SERVICE
// ============================================================================

/// The four explanation operations over indexed datasets.
pub struct ExplainService {
    datasets: Arc<dyn DatasetProvider>,
    loader: Arc<dyn ModelLoader>,
    config: AttributionConfig,
    engines: RwLock<HashMap<String, Arc<AttributionEngine>>>,
}

impl ExplainService {
    /// # Errors
    /// `Config` if `config` fails validation.
    pub fn new(
        datasets: Arc<dyn DatasetProvider>,
        loader: Arc<dyn ModelLoader>,
        config: AttributionConfig,
    ) -> AttributionResult<Self> {
        config.validate()?;
        Ok(Self {
            datasets,
            loader,
            config,
            engines: RwLock::new(HashMap::new()),
        })
    }

    /// Engine for `dataset`, loaded on first use.
    pub fn engine(&self, dataset: &str) -> AttributionResult<Arc<AttributionEngine>> {
        if let Some(engine) = self.engines.read().get(dataset) {
            return Ok(Arc::clone(engine));
        }

        let model = self.loader.load(dataset)?;
        tracing::info!(
            target: "attribution_engine::service",
            dataset = dataset,
            params = model.encoder.param_count(),
            "Model loaded"
        );
        let engine = Arc::new(AttributionEngine::new(
            model.encoder,
            model.tokenizer,
            self.config.clone(),
        )?);

        let mut engines = self.engines.write();
        Ok(Arc::clone(
            engines.entry(dataset.to_string()).or_insert(engine),
        ))
    }

    pub fn loaded_datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn encode(&self, dataset: &str, text: &str) -> AttributionResult<EncodeResponse> {
        let engine = self.engine(dataset)?;
        Ok(EncodeResponse {
            encoding: engine.encode(text)?,
        })
    }

    /// Importance of example `index` under `method`.
    ///
    /// # Errors
    /// `InvalidMethod` before anything is loaded or computed.
    pub fn importance(&self, dataset: &str, index: usize, method: &str) -> AttributionResult<ImportanceResponse> {
        let method: Method = method.parse()?;
        let engine = self.engine(dataset)?;
        let resolved = self.resolve(dataset, index)?;

        tracing::debug!(
            target: "attribution_engine::service",
            dataset = dataset,
            index = index,
            method = %method,
            "importance"
        );

        let attribution = engine.importance(method, &resolved.example.text, &resolved.target())?;
        Ok(attribution.into())
    }

    /// Importance of example `index` under every method.
    pub fn importances_all(&self, dataset: &str, index: usize) -> AttributionResult<ImportancesAllResponse> {
        let engine = self.engine(dataset)?;
        let resolved = self.resolve(dataset, index)?;

        tracing::debug!(
            target: "attribution_engine::service",
            dataset = dataset,
            index = index,
            "importances_all"
        );

        let mut by_method: HashMap<Method, Attribution> = engine
            .importances_all(&resolved.example.text, &resolved.target())?
            .into_iter()
            .map(|a| (a.method, a))
            .collect();
        let mut take = |method: Method| {
            by_method.remove(&method).ok_or_else(|| AttributionError::Tensor {
                message: format!("method {} produced no result", method),
            })
        };
        let attention = take(Method::Attention)?;
        let lime = take(Method::Lime)?;
        let gradient = take(Method::Gradient)?;
        let integrad = take(Method::Integrad)?;

        let mut diagnostics = attention.diagnostics;
        diagnostics.extend(
            integrad
                .diagnostics
                .into_iter()
                .filter(|d| !d.is_truncation()),
        );

        Ok(ImportancesAllResponse {
            tokens: attention.tokens,
            attn_importance: attention.importance,
            lime_importance: lime.importance,
            grad_importance: gradient.importance,
            integrad_importance: integrad.importance,
            diagnostics,
        })
    }

    /// Relation between examples `index1` and `index2`.
    ///
    /// # Errors
    /// `InvalidMethod` for an unknown `reltype`, before anything is computed.
    pub fn relation(
        &self,
        dataset: &str,
        index1: usize,
        index2: usize,
        reltype: &str,
    ) -> AttributionResult<RelationResponse> {
        let kind: RelationKind = reltype.parse()?;
        let engine = self.engine(dataset)?;
        let text1 = self.datasets.example(dataset, index1)?.text;
        let text2 = self.datasets.example(dataset, index2)?.text;

        tracing::debug!(
            target: "attribution_engine::service",
            dataset = dataset,
            index1 = index1,
            index2 = index2,
            kind = kind.as_str(),
            "relation"
        );

        match kind {
            RelationKind::Token2Token => engine
                .token2token(&text1, &text2)
                .map(RelationResponse::Token2Token),
            RelationKind::Integrad => engine
                .integrad_relation(&text1, &text2)
                .map(RelationResponse::Integrad),
        }
    }

    fn resolve(&self, dataset: &str, index: usize) -> AttributionResult<ResolvedExample> {
        let example = self.datasets.example(dataset, index)?;
        let Some(selection) = self.datasets.support_selection(dataset, index)? else {
            return Ok(ResolvedExample {
                example,
                support: None,
                reference: None,
            });
        };

        if selection.indices.len() != selection.similarities.len() {
            return Err(AttributionError::Dataset {
                message: format!(
                    "support selection of {}[{}] has {} indices but {} similarities",
                    dataset,
                    index,
                    selection.indices.len(),
                    selection.similarities.len()
                ),
            });
        }

        let support = selection
            .indices
            .iter()
            .map(|&i| {
                self.datasets
                    .example(dataset, i)
                    .map(|e| SupportExample::new(e.text, e.category))
            })
            .collect::<AttributionResult<SupportSet>>()?;
        let reference = argmax(&selection.similarities).map(|i| support.examples[i].text.clone());

        Ok(ResolvedExample {
            example,
            support: Some(support),
            reference,
        })
    }
}

/// An example with its support set and contrastive reference.
struct ResolvedExample {
    example: Example,
    support: Option<SupportSet>,
    reference: Option<String>,
}

impl ResolvedExample {
    fn target(&self) -> AttributionTarget<'_> {
        AttributionTarget {
            reference: self.reference.as_deref(),
            support_set: self.support.as_ref(),
        }
    }
}
