//! Weight loading for BERT checkpoints stored as safetensors.
//!
//! Tensor name format (HuggingFace `BertModel`, optional `bert.` prefix):
//!   - embeddings.word_embeddings.weight [vocab, hidden]
//!   - embeddings.position_embeddings.weight [max_pos, hidden]
//!   - embeddings.token_type_embeddings.weight [type_vocab, hidden]
//!   - embeddings.LayerNorm.{weight,bias} (or {gamma,beta})
//!   - encoder.layer.{i}.attention.self.{query,key,value}.{weight,bias}
//!   - encoder.layer.{i}.attention.output.dense.{weight,bias}
//!   - encoder.layer.{i}.attention.output.LayerNorm.{weight,bias}
//!   - encoder.layer.{i}.intermediate.dense.{weight,bias}
//!   - encoder.layer.{i}.output.dense.{weight,bias}
//!   - encoder.layer.{i}.output.LayerNorm.{weight,bias}

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::error::{AttributionError, AttributionResult};

use super::config::BertConfig;
use super::weights::{AttentionWeights, BertWeights, EmbeddingWeights, EncoderLayerWeights, FfnWeights};

/// Load BERT weights from `model.safetensors` and `config.json` in `model_dir`.
pub fn load_bert_weights(model_dir: &Path, device: &Device) -> AttributionResult<BertWeights> {
    let safetensors_path = model_dir.join("model.safetensors");
    if !safetensors_path.exists() {
        return Err(AttributionError::ModelLoad {
            path: safetensors_path,
            message: "model.safetensors not found".to_string(),
        });
    }

    let config = BertConfig::from_model_dir(model_dir)?;

    // SAFETY: the file is memory-mapped read-only and not modified while loaded.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[&safetensors_path], DType::F32, device).map_err(
            |e| AttributionError::ModelLoad {
                path: safetensors_path.clone(),
                message: format!("safetensors load failed: {}", e),
            },
        )?
    };

    let vb = if vb.contains_tensor("embeddings.word_embeddings.weight") {
        vb
    } else {
        vb.pp("bert")
    };

    let load_err = |what: String| {
        let path = safetensors_path.clone();
        move |e: candle_core::Error| AttributionError::ModelLoad {
            path,
            message: format!("{}: {}", what, e),
        }
    };

    let embeddings = load_embeddings(&vb.pp("embeddings"), &config)
        .map_err(load_err("embeddings".to_string()))?;

    let mut encoder_layers = Vec::with_capacity(config.num_hidden_layers);
    for layer_idx in 0..config.num_hidden_layers {
        let layer = load_encoder_layer(&vb.pp(format!("encoder.layer.{}", layer_idx)), &config)
            .map_err(load_err(format!("encoder layer {}", layer_idx)))?;
        encoder_layers.push(layer);
    }

    tracing::info!(
        target: "attribution_engine::encoder",
        model_dir = %model_dir.display(),
        layers = config.num_hidden_layers,
        hidden_size = config.hidden_size,
        heads = config.num_attention_heads,
        "BERT weights loaded"
    );

    Ok(BertWeights {
        config,
        embeddings,
        encoder_layers,
        device: device.clone(),
    })
}

fn load_embeddings(vb: &VarBuilder, config: &BertConfig) -> candle_core::Result<EmbeddingWeights> {
    let hidden = config.hidden_size;
    let (layer_norm_weight, layer_norm_bias) = load_layer_norm(&vb.pp("LayerNorm"), hidden)?;
    Ok(EmbeddingWeights {
        word_embeddings: vb.get((config.vocab_size, hidden), "word_embeddings.weight")?,
        position_embeddings: vb.get(
            (config.max_position_embeddings, hidden),
            "position_embeddings.weight",
        )?,
        token_type_embeddings: vb.get(
            (config.type_vocab_size, hidden),
            "token_type_embeddings.weight",
        )?,
        layer_norm_weight,
        layer_norm_bias,
    })
}

fn load_encoder_layer(
    vb: &VarBuilder,
    config: &BertConfig,
) -> candle_core::Result<EncoderLayerWeights> {
    let hidden = config.hidden_size;
    let inter = config.intermediate_size;

    let self_attn = vb.pp("attention.self");
    let attn_out = vb.pp("attention.output");
    let (attn_ln_w, attn_ln_b) = load_layer_norm(&attn_out.pp("LayerNorm"), hidden)?;

    let attention = AttentionWeights {
        query_weight: self_attn.get((hidden, hidden), "query.weight")?,
        query_bias: self_attn.get(hidden, "query.bias")?,
        key_weight: self_attn.get((hidden, hidden), "key.weight")?,
        key_bias: self_attn.get(hidden, "key.bias")?,
        value_weight: self_attn.get((hidden, hidden), "value.weight")?,
        value_bias: self_attn.get(hidden, "value.bias")?,
        output_weight: attn_out.get((hidden, hidden), "dense.weight")?,
        output_bias: attn_out.get(hidden, "dense.bias")?,
        layer_norm_weight: attn_ln_w,
        layer_norm_bias: attn_ln_b,
    };

    let output = vb.pp("output");
    let (ffn_ln_w, ffn_ln_b) = load_layer_norm(&output.pp("LayerNorm"), hidden)?;
    let ffn = FfnWeights {
        intermediate_weight: vb.get((inter, hidden), "intermediate.dense.weight")?,
        intermediate_bias: vb.get(inter, "intermediate.dense.bias")?,
        output_weight: output.get((hidden, inter), "dense.weight")?,
        output_bias: output.get(hidden, "dense.bias")?,
        layer_norm_weight: ffn_ln_w,
        layer_norm_bias: ffn_ln_b,
    };

    Ok(EncoderLayerWeights { attention, ffn })
}

/// Older checkpoints name LayerNorm parameters `gamma`/`beta`.
fn load_layer_norm(vb: &VarBuilder, hidden: usize) -> candle_core::Result<(Tensor, Tensor)> {
    if vb.contains_tensor("weight") {
        Ok((vb.get(hidden, "weight")?, vb.get(hidden, "bias")?))
    } else {
        Ok((vb.get(hidden, "gamma")?, vb.get(hidden, "beta")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_bert_weights(dir.path(), &Device::Cpu);
        match result {
            Err(AttributionError::ModelLoad { path, .. }) => {
                assert!(path.ends_with("model.safetensors"));
            }
            other => panic!("Expected ModelLoad error, got {:?}", other.map(|_| ())),
        }
    }
}
