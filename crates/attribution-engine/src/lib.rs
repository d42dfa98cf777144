//! Token attribution for BERT-style sentence encoders.
//!
//! Explains why a similarity classifier groups or separates utterances by
//! scoring every token of a sentence, and every token pair of two sentences.
//!
//! # Architecture
//!
//! - **BertEncoder**: candle BERT forward pass, split at the embedding layer
//! - **EncoderAdapter**: per-request view of the encoder with explicit modes
//!   for the forward shapes each method needs
//! - **SimilarityClassifier**: temperature-scaled inner product against a
//!   support set
//! - **Method**: attention, lime, gradient, integrad behind `ImportanceMethod`
//! - **AttributionEngine**: single-text importance and two-text relations
//! - **ExplainService**: dataset-indexed operations returning JSON payloads
//!
//! # Example
//!
//! ```rust,ignore
//! use attribution_engine::{AttributionEngine, AttributionTarget, Method};
//!
//! let engine = AttributionEngine::load(model_dir, config)?;
//! let attribution = engine.importance(Method::Attention, "cancel my order", &AttributionTarget::default())?;
//! assert_eq!(attribution.tokens.len(), attribution.importance.len());
//! ```

pub mod adapter;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod methods;
pub mod relation;
pub mod service;
pub mod tokenize;

pub use adapter::{EncoderAdapter, Mode, ModeGuard};
pub use classifier::{EncodedSupportSet, SimilarityClassifier, SupportExample, SupportSet};
pub use config::{AttributionConfig, BaselineKind};
pub use dataset::InMemoryDataset;
pub use diagnostics::Diagnostic;
pub use encoder::{BertConfig, BertEncoder, BertWeights, EncoderOutput};
pub use engine::AttributionEngine;
pub use error::{AttributionError, AttributionResult};
pub use methods::{Attribution, AttributionTarget, ImportanceMethod, Method, MethodContext};
pub use relation::{IntegradRelation, RelationKind, Token2TokenRelation};
pub use service::{DatasetProvider, DirectoryModelLoader, ExplainService, LoadedModel, ModelLoader};
pub use tokenize::{SentenceTokenizer, TokenizedText};
