//! Command handlers.

use anyhow::Context;
use attribution_engine::{
    AttributionConfig, AttributionError, DirectoryModelLoader, ExplainService, InMemoryDataset,
};
use clap::Args;
use serde_json::Value;
use tracing::{error, info};

use crate::{Cli, Commands};

#[derive(Args)]
pub struct EncodeArgs {
    /// Dataset whose model encodes the text
    pub dataset: String,
    /// Text to encode
    pub text: String,
}

#[derive(Args)]
pub struct ImportanceArgs {
    pub dataset: String,
    /// Example index within the dataset
    pub index: usize,
    /// attention, lime, gradient or integrad
    #[arg(short, long, default_value = "attention")]
    pub method: String,
}

#[derive(Args)]
pub struct ImportancesArgs {
    pub dataset: String,
    pub index: usize,
}

#[derive(Args)]
pub struct RelationArgs {
    pub dataset: String,
    pub index1: usize,
    pub index2: usize,
    /// token2token or integrad
    #[arg(short, long, default_value = "token2token")]
    pub reltype: String,
}

/// Run the command and print its JSON result. Returns the exit code.
pub fn handle(cli: Cli) -> i32 {
    let pretty = cli.pretty;
    match run(cli) {
        Ok(value) => {
            let rendered = if pretty {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            match rendered {
                Ok(text) => {
                    println!("{}", text);
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<AttributionError>() {
                Some(AttributionError::InvalidMethod { .. }) => 2,
                _ => 1,
            }
        }
    }
}

/// Build the service from the CLI flags and run the subcommand.
pub fn run(cli: Cli) -> anyhow::Result<Value> {
    let config = match &cli.config {
        Some(path) => AttributionConfig::from_file(path)?,
        None => AttributionConfig::default(),
    }
    .with_env_overrides();
    let models_dir = cli
        .models_dir
        .clone()
        .unwrap_or_else(|| config.models.models_dir.clone().into());

    let datasets = InMemoryDataset::from_file(&cli.datasets)
        .with_context(|| format!("loading datasets from {}", cli.datasets.display()))?;
    let loader = DirectoryModelLoader::new(&models_dir);
    let service = ExplainService::new(std::sync::Arc::new(datasets), std::sync::Arc::new(loader), config)?;

    info!(models_dir = %models_dir.display(), "Service ready");

    let value = match cli.command {
        Commands::Encode(args) => serde_json::to_value(service.encode(&args.dataset, &args.text)?)?,
        Commands::Importance(args) => {
            serde_json::to_value(service.importance(&args.dataset, args.index, &args.method)?)?
        }
        Commands::Importances(args) => {
            serde_json::to_value(service.importances_all(&args.dataset, args.index)?)?
        }
        Commands::Relation(args) => serde_json::to_value(service.relation(
            &args.dataset,
            args.index1,
            args.index2,
            &args.reltype,
        )?)?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_test_utils::{random_weights, write_model_dir};
    use clap::Parser;
    use std::path::Path;

    const DATASET: &str = r#"{
        "banking": {
            "examples": [
                { "text": "please cancel my order", "category": "cancel" },
                { "text": "cancel my booking", "category": "cancel" },
                { "text": "track my package", "category": "track" }
            ],
            "support": { "0": { "indices": [1, 2], "similarities": [0.9, 0.1] } }
        }
    }"#;

    fn fixture(root: &Path) -> (String, String) {
        let models = root.join("models");
        std::fs::create_dir_all(models.join("banking")).unwrap();
        write_model_dir(&models.join("banking"), &random_weights(42)).unwrap();
        let datasets = root.join("datasets.json");
        std::fs::write(&datasets, DATASET).unwrap();
        (
            models.to_string_lossy().into_owned(),
            datasets.to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn test_importance_command() {
        let root = tempfile::tempdir().unwrap();
        let (models, datasets) = fixture(root.path());

        let cli = Cli::try_parse_from([
            "attribution", "--models-dir", &models, "--datasets", &datasets,
            "importance", "banking", "0", "--method", "gradient",
        ])
        .unwrap();
        let value = run(cli).unwrap();
        println!("AFTER: {}", value);

        assert_eq!(value["tokens"].as_array().unwrap().len(), 4);
        assert_eq!(value["importance"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_relation_command() {
        let root = tempfile::tempdir().unwrap();
        let (models, datasets) = fixture(root.path());

        let cli = Cli::try_parse_from([
            "attribution", "--models-dir", &models, "--datasets", &datasets,
            "relation", "banking", "1", "2",
        ])
        .unwrap();
        let value = run(cli).unwrap();
        assert_eq!(value["links"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_method_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let (models, datasets) = fixture(root.path());

        let cli = Cli::try_parse_from([
            "attribution", "--models-dir", &models, "--datasets", &datasets,
            "importance", "banking", "0", "--method", "shap",
        ])
        .unwrap();
        assert_eq!(handle(cli), 2);
    }

    #[test]
    fn test_missing_dataset_file_exit_code() {
        let cli = Cli::try_parse_from([
            "attribution", "--datasets", "/nonexistent/datasets.json", "encode", "banking", "hi",
        ])
        .unwrap();
        assert_eq!(handle(cli), 1);
    }
}
