//! Service operations end to end over an in-memory dataset.

use std::sync::Arc;

use attribution_engine::service::RelationResponse;
use attribution_engine::{
    AttributionError, DirectoryModelLoader, ExplainService, InMemoryDataset, ModelLoader,
};
use attribution_test_utils::{
    bag_of_words_encoder, random_encoder, random_weights, test_config, write_model_dir,
    FixedModelLoader,
};

const DATASET: &str = r#"{
    "banking": {
        "examples": [
            { "text": "please cancel my order", "category": "cancel" },
            { "text": "cancel my booking", "category": "cancel" },
            { "text": "track my package", "category": "track" },
            { "text": "book a flight", "category": "book" }
        ],
        "support": {
            "0": { "indices": [1, 2], "similarities": [0.91, 0.12] },
            "3": { "indices": [1, 2], "similarities": [0.20, 0.40] }
        }
    }
}"#;

fn service_with(loader: Arc<FixedModelLoader>) -> ExplainService {
    let datasets = Arc::new(InMemoryDataset::from_json_str(DATASET).unwrap());
    ExplainService::new(datasets, loader, test_config()).unwrap()
}

#[test]
fn test_importance_per_method() {
    let service = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));

    for method in ["attention", "lime", "gradient", "integrad"] {
        let response = service.importance("banking", 0, method).unwrap();
        println!("{}: {:?}", method, serde_json::to_string(&response).unwrap());
        assert_eq!(response.tokens, vec!["please", "cancel", "my", "order"]);
        assert_eq!(response.importance.len(), 4);
    }
}

#[test]
fn test_invalid_method_fails_before_loading() {
    let loader = Arc::new(FixedModelLoader::new(random_encoder(42)));
    let service = service_with(Arc::clone(&loader));

    let result = service.importance("banking", 0, "shap");
    assert!(matches!(result, Err(AttributionError::InvalidMethod { .. })));
    let result = service.relation("banking", 0, 1, "attention");
    assert!(matches!(result, Err(AttributionError::InvalidMethod { .. })));
    assert_eq!(loader.load_count(), 0);
}

#[test]
fn test_models_cached_per_dataset() {
    let loader = Arc::new(FixedModelLoader::new(random_encoder(42)));
    let service = service_with(Arc::clone(&loader));

    println!("BEFORE: loaded = {:?}", service.loaded_datasets());
    service.encode("banking", "hello").unwrap();
    service.importance("banking", 3, "attention").unwrap();
    println!("AFTER: loaded = {:?}", service.loaded_datasets());

    assert_eq!(loader.load_count(), 1);
    assert_eq!(service.loaded_datasets(), vec!["banking"]);
}

#[test]
fn test_encode_returns_hidden_sized_vector() {
    let service = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));
    let response = service.encode("banking", "cancel my booking").unwrap();
    assert_eq!(response.encoding.len(), 32);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json["encoding"].is_array());
}

#[test]
fn test_importances_all_payload() {
    let service = service_with(Arc::new(FixedModelLoader::new(bag_of_words_encoder())));
    let response = service.importances_all("banking", 0).unwrap();
    let json = serde_json::to_value(&response).unwrap();
    println!("{}", json);

    for key in ["tokens", "attn_importance", "lime_importance", "grad_importance", "integrad_importance"] {
        assert_eq!(json[key].as_array().unwrap().len(), 4, "key {}", key);
    }
    let cancel = response.tokens.iter().position(|t| t == "cancel").unwrap();
    let top = response
        .lime_importance
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(top, cancel);
}

#[test]
fn test_importances_all_requires_support_selection() {
    let service = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));
    let result = service.importances_all("banking", 1);
    assert!(matches!(
        result,
        Err(AttributionError::MissingSupportSet { method: "lime" })
    ));
}

#[test]
fn test_relation_payloads() {
    let service = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));

    let token2token = service.relation("banking", 3, 3, "token2token").unwrap();
    let json = serde_json::to_value(&token2token).unwrap();
    for key in ["links", "tokens1", "tokens2", "importance1", "importance2", "similarity"] {
        assert!(!json[key].is_null(), "missing {}", key);
    }
    assert!(matches!(token2token, RelationResponse::Token2Token(_)));

    let integrad = service.relation("banking", 0, 1, "integrad").unwrap();
    let json = serde_json::to_value(&integrad).unwrap();
    for key in ["tokens1", "tokens2", "importance1", "importance2", "similarity"] {
        assert!(!json[key].is_null(), "missing {}", key);
    }
    assert!(json["links"].is_null());
}

#[test]
fn test_unknown_example() {
    let service = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));
    assert!(matches!(
        service.importance("banking", 99, "attention"),
        Err(AttributionError::Dataset { .. })
    ));
    assert!(matches!(
        service.importance("travel", 0, "attention"),
        Err(AttributionError::Dataset { .. })
    ));
}

#[test]
fn test_directory_loader_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let model_dir = root.path().join("banking");
    std::fs::create_dir(&model_dir).unwrap();
    write_model_dir(&model_dir, &random_weights(42)).unwrap();

    let loader = DirectoryModelLoader::new(root.path());
    let model = loader.load("banking").unwrap();
    assert_eq!(model.encoder.hidden_size(), 32);
    assert_eq!(model.encoder.config().num_hidden_layers, 2);

    // Same weights, same encoding.
    let datasets = Arc::new(InMemoryDataset::from_json_str(DATASET).unwrap());
    let from_disk = ExplainService::new(datasets, Arc::new(loader), test_config()).unwrap();
    let in_memory = service_with(Arc::new(FixedModelLoader::new(random_encoder(42))));
    let a = from_disk.encode("banking", "track my package").unwrap().encoding;
    let b = in_memory.encode("banking", "track my package").unwrap().encoding;
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-5);
    }

    assert!(matches!(
        DirectoryModelLoader::new(root.path()).load("travel"),
        Err(AttributionError::ModelLoad { .. })
    ));
}
