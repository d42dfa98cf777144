//! Test fixtures for the attribution workspace.
//!
//! Everything here is small and deterministic so model-level properties can
//! be tested without downloaded checkpoints:
//!
//! - a WordPiece tokenizer over a short intent-style vocabulary
//! - `random_encoder(seed)`: 2-layer, 32-wide BERT with seeded weights
//! - `bag_of_words_encoder()`: hand-built encoder whose pooled output is
//!   the normalized word-count vector of the sentence

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use attribution_engine::encoder::{
    AttentionWeights, BertConfig, BertEncoder, BertWeights, EmbeddingWeights, EncoderLayerWeights,
    FfnWeights,
};
use attribution_engine::service::{LoadedModel, ModelLoader};
use attribution_engine::{AttributionConfig, AttributionEngine, AttributionResult, SentenceTokenizer};
use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde_json::json;

/// Special tokens, ids 0..5.
pub const SPECIAL_TOKENS: [&str; 5] = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"];

/// Regular vocabulary, ids 5.. in order.
pub const WORDS: &[&str] = &[
    "please", "cancel", "my", "order", "booking", "track", "package", "book", "a", "flight",
    "i", "want", "to", "the", "where", "is", "hello", "how", "are", "you", "refund", "##s",
    "##ing",
];

pub fn vocab_size() -> usize {
    SPECIAL_TOKENS.len() + WORDS.len()
}

/// `tokenizer.json` contents for the fixture vocabulary.
pub fn tokenizer_json() -> serde_json::Value {
    let vocab: serde_json::Map<String, serde_json::Value> = SPECIAL_TOKENS
        .iter()
        .chain(WORDS)
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();

    let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
        .iter()
        .enumerate()
        .map(|(id, token)| {
            json!({
                "id": id,
                "content": token,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordPiece",
            "unk_token": "[UNK]",
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    })
}

/// Fixture tokenizer.
pub fn test_tokenizer() -> Arc<SentenceTokenizer> {
    let inner = tokenizers::Tokenizer::from_str(&tokenizer_json().to_string())
        .expect("fixture tokenizer JSON must parse");
    Arc::new(SentenceTokenizer::from_tokenizer(inner).expect("fixture vocabulary has special tokens"))
}

// ============================================================================
// ENCODERS
// ============================================================================

/// 2 layers, hidden 32, 4 heads.
pub fn random_config() -> BertConfig {
    BertConfig {
        vocab_size: vocab_size(),
        hidden_size: 32,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        intermediate_size: 64,
        max_position_embeddings: 64,
        type_vocab_size: 2,
        layer_norm_eps: 1e-12,
    }
}

struct WeightSampler {
    rng: ChaCha8Rng,
    device: Device,
}

impl WeightSampler {
    fn normal(&mut self, shape: &[usize], mean: f32, std: f32) -> Tensor {
        let dist = Normal::new(mean, std).expect("positive std");
        let count: usize = shape.iter().product();
        let values: Vec<f32> = (0..count).map(|_| dist.sample(&mut self.rng)).collect();
        Tensor::from_vec(values, shape, &self.device).expect("shape matches value count")
    }

    /// LayerNorm with gamma near 1 and small beta, so pooled sums are non-zero.
    fn layer_norm(&mut self, hidden: usize) -> (Tensor, Tensor) {
        (
            self.normal(&[hidden], 1.0, 0.05),
            self.normal(&[hidden], 0.0, 0.05),
        )
    }
}

/// Seeded random weights for [`random_config`].
pub fn random_weights(seed: u64) -> BertWeights {
    let config = random_config();
    let h = config.hidden_size;
    let i = config.intermediate_size;
    let mut s = WeightSampler {
        rng: ChaCha8Rng::seed_from_u64(seed),
        device: Device::Cpu,
    };

    let (ln_w, ln_b) = s.layer_norm(h);
    let embeddings = EmbeddingWeights {
        word_embeddings: s.normal(&[config.vocab_size, h], 0.0, 1.0),
        position_embeddings: s.normal(&[config.max_position_embeddings, h], 0.0, 0.1),
        token_type_embeddings: s.normal(&[config.type_vocab_size, h], 0.0, 0.1),
        layer_norm_weight: ln_w,
        layer_norm_bias: ln_b,
    };

    let encoder_layers = (0..config.num_hidden_layers)
        .map(|_| {
            let (attn_ln_w, attn_ln_b) = s.layer_norm(h);
            let attention = AttentionWeights {
                query_weight: s.normal(&[h, h], 0.0, 0.05),
                query_bias: s.normal(&[h], 0.0, 0.01),
                key_weight: s.normal(&[h, h], 0.0, 0.05),
                key_bias: s.normal(&[h], 0.0, 0.01),
                value_weight: s.normal(&[h, h], 0.0, 0.05),
                value_bias: s.normal(&[h], 0.0, 0.01),
                output_weight: s.normal(&[h, h], 0.0, 0.05),
                output_bias: s.normal(&[h], 0.0, 0.01),
                layer_norm_weight: attn_ln_w,
                layer_norm_bias: attn_ln_b,
            };
            let (ffn_ln_w, ffn_ln_b) = s.layer_norm(h);
            let ffn = FfnWeights {
                intermediate_weight: s.normal(&[i, h], 0.0, 0.05),
                intermediate_bias: s.normal(&[i], 0.0, 0.01),
                output_weight: s.normal(&[h, i], 0.0, 0.05),
                output_bias: s.normal(&[h], 0.0, 0.01),
                layer_norm_weight: ffn_ln_w,
                layer_norm_bias: ffn_ln_b,
            };
            EncoderLayerWeights { attention, ffn }
        })
        .collect();

    BertWeights {
        config,
        embeddings,
        encoder_layers,
        device: Device::Cpu,
    }
}

pub fn random_encoder(seed: u64) -> Arc<BertEncoder> {
    Arc::new(BertEncoder::new(random_weights(seed)).expect("random fixture is consistent"))
}

/// Hand-built one-layer encoder.
///
/// Word embeddings are one-hot, positions and token types are zero, Q/K are
/// zero (uniform attention) and V is `6 I`, FFN is zero. Position 0 therefore
/// ends up as the normalized `[CLS]` vector plus six times the mean token
/// vector: overlap in words is overlap in encodings.
pub fn bag_of_words_encoder() -> Arc<BertEncoder> {
    let h = 64;
    let inter = 4;
    let config = BertConfig {
        vocab_size: vocab_size(),
        hidden_size: h,
        num_hidden_layers: 1,
        num_attention_heads: 4,
        intermediate_size: inter,
        max_position_embeddings: 64,
        type_vocab_size: 2,
        layer_norm_eps: 1e-12,
    };
    let device = Device::Cpu;
    let zeros = |shape: &[usize]| Tensor::zeros(shape, candle_core::DType::F32, &device).expect("zeros");
    let ones = |n: usize| Tensor::ones(n, candle_core::DType::F32, &device).expect("ones");
    let eye = |scale: f32| {
        let values: Vec<f32> = (0..h * h)
            .map(|k| if k / h == k % h { scale } else { 0.0 })
            .collect();
        Tensor::from_vec(values, (h, h), &device).expect("identity")
    };

    let one_hot: Vec<f32> = (0..config.vocab_size * h)
        .map(|k| if k / h == k % h { 1.0 } else { 0.0 })
        .collect();

    let embeddings = EmbeddingWeights {
        word_embeddings: Tensor::from_vec(one_hot, (config.vocab_size, h), &device).expect("one-hot"),
        position_embeddings: zeros(&[config.max_position_embeddings, h]),
        token_type_embeddings: zeros(&[config.type_vocab_size, h]),
        layer_norm_weight: ones(h),
        layer_norm_bias: zeros(&[h]),
    };
    let layer = EncoderLayerWeights {
        attention: AttentionWeights {
            query_weight: zeros(&[h, h]),
            query_bias: zeros(&[h]),
            key_weight: zeros(&[h, h]),
            key_bias: zeros(&[h]),
            value_weight: eye(6.0),
            value_bias: zeros(&[h]),
            output_weight: eye(1.0),
            output_bias: zeros(&[h]),
            layer_norm_weight: ones(h),
            layer_norm_bias: zeros(&[h]),
        },
        ffn: FfnWeights {
            intermediate_weight: zeros(&[inter, h]),
            intermediate_bias: zeros(&[inter]),
            output_weight: zeros(&[h, inter]),
            output_bias: zeros(&[h]),
            layer_norm_weight: ones(h),
            layer_norm_bias: zeros(&[h]),
        },
    };

    let weights = BertWeights {
        config,
        embeddings,
        encoder_layers: vec![layer],
        device,
    };
    Arc::new(BertEncoder::new(weights).expect("bag-of-words fixture is consistent"))
}

// ============================================================================
// ENGINES AND LOADERS
// ============================================================================

/// Defaults with a fixed perturbation seed.
pub fn test_config() -> AttributionConfig {
    let mut config = AttributionConfig::default();
    config.perturbation.seed = Some(7);
    config
}

pub fn engine_with(encoder: Arc<BertEncoder>, config: AttributionConfig) -> AttributionEngine {
    AttributionEngine::new(encoder, test_tokenizer(), config).expect("test config is valid")
}

/// Random encoder (seed 42) with [`test_config`].
pub fn random_engine() -> AttributionEngine {
    engine_with(random_encoder(42), test_config())
}

/// Bag-of-words encoder with [`test_config`].
pub fn bag_of_words_engine() -> AttributionEngine {
    engine_with(bag_of_words_encoder(), test_config())
}

/// Serves one in-memory model for every dataset name and counts loads.
pub struct FixedModelLoader {
    model: LoadedModel,
    loads: std::sync::atomic::AtomicUsize,
}

impl FixedModelLoader {
    pub fn new(encoder: Arc<BertEncoder>) -> Self {
        Self {
            model: LoadedModel {
                encoder,
                tokenizer: test_tokenizer(),
            },
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ModelLoader for FixedModelLoader {
    fn load(&self, _dataset: &str) -> AttributionResult<LoadedModel> {
        self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.model.clone())
    }
}

/// Write `config.json`, `model.safetensors` and `tokenizer.json` for
/// `weights` into `dir` using HuggingFace tensor names.
pub fn write_model_dir(dir: &Path, weights: &BertWeights) -> std::io::Result<()> {
    let c = &weights.config;
    let config = json!({
        "architectures": ["BertModel"],
        "vocab_size": c.vocab_size,
        "hidden_size": c.hidden_size,
        "num_hidden_layers": c.num_hidden_layers,
        "num_attention_heads": c.num_attention_heads,
        "intermediate_size": c.intermediate_size,
        "max_position_embeddings": c.max_position_embeddings,
        "type_vocab_size": c.type_vocab_size,
        "layer_norm_eps": c.layer_norm_eps
    });
    std::fs::write(dir.join("config.json"), config.to_string())?;
    std::fs::write(dir.join("tokenizer.json"), tokenizer_json().to_string())?;

    let e = &weights.embeddings;
    let mut tensors: HashMap<String, Tensor> = HashMap::from([
        ("embeddings.word_embeddings.weight".to_string(), e.word_embeddings.clone()),
        ("embeddings.position_embeddings.weight".to_string(), e.position_embeddings.clone()),
        ("embeddings.token_type_embeddings.weight".to_string(), e.token_type_embeddings.clone()),
        ("embeddings.LayerNorm.weight".to_string(), e.layer_norm_weight.clone()),
        ("embeddings.LayerNorm.bias".to_string(), e.layer_norm_bias.clone()),
    ]);
    for (idx, layer) in weights.encoder_layers.iter().enumerate() {
        let p = format!("encoder.layer.{}", idx);
        let a = &layer.attention;
        let f = &layer.ffn;
        for (name, tensor) in [
            ("attention.self.query.weight", &a.query_weight),
            ("attention.self.query.bias", &a.query_bias),
            ("attention.self.key.weight", &a.key_weight),
            ("attention.self.key.bias", &a.key_bias),
            ("attention.self.value.weight", &a.value_weight),
            ("attention.self.value.bias", &a.value_bias),
            ("attention.output.dense.weight", &a.output_weight),
            ("attention.output.dense.bias", &a.output_bias),
            ("attention.output.LayerNorm.weight", &a.layer_norm_weight),
            ("attention.output.LayerNorm.bias", &a.layer_norm_bias),
            ("intermediate.dense.weight", &f.intermediate_weight),
            ("intermediate.dense.bias", &f.intermediate_bias),
            ("output.dense.weight", &f.output_weight),
            ("output.dense.bias", &f.output_bias),
            ("output.LayerNorm.weight", &f.layer_norm_weight),
            ("output.LayerNorm.bias", &f.layer_norm_bias),
        ] {
            tensors.insert(format!("{}.{}", p, name), tensor.clone());
        }
    }

    candle_core::safetensors::save(&tensors, dir.join("model.safetensors"))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
