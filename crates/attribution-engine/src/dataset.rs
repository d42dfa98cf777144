//! JSON-backed dataset provider.
//!
//! ```json
//! {
//!   "banking": {
//!     "examples": [
//!       { "text": "please cancel my order", "category": "cancel" },
//!       { "text": "cancel my booking", "category": "cancel" }
//!     ],
//!     "support": {
//!       "0": { "indices": [1], "similarities": [0.93] }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, AttributionResult};
use crate::service::{DatasetProvider, Example, SupportSelection};

/// Examples and support selections of one dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetRecords {
    pub examples: Vec<Example>,
    /// Support selection keyed by example index.
    #[serde(default)]
    pub support: HashMap<usize, SupportSelection>,
}

/// Every dataset held in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryDataset {
    datasets: HashMap<String, DatasetRecords>,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the JSON layout shown in the module docs.
    pub fn from_file(path: impl AsRef<Path>) -> AttributionResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| AttributionError::Dataset {
            message: format!("Failed to read dataset file '{}': {}", path.display(), e),
        })?;
        let loaded = Self::from_json_str(&contents)?;
        tracing::info!(
            target: "attribution_engine::dataset",
            path = %path.display(),
            datasets = loaded.datasets.len(),
            "Dataset file loaded"
        );
        Ok(loaded)
    }

    pub fn from_json_str(json: &str) -> AttributionResult<Self> {
        let loaded: Self = serde_json::from_str(json)?;
        for (name, records) in &loaded.datasets {
            records.check(name)?;
        }
        Ok(loaded)
    }

    /// Add or replace a dataset.
    pub fn insert(&mut self, name: impl Into<String>, records: DatasetRecords) -> AttributionResult<()> {
        let name = name.into();
        records.check(&name)?;
        self.datasets.insert(name, records);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn records(&self, dataset: &str) -> AttributionResult<&DatasetRecords> {
        self.datasets.get(dataset).ok_or_else(|| AttributionError::Dataset {
            message: format!("Unknown dataset '{}'", dataset),
        })
    }
}

impl DatasetRecords {
    /// Every support selection must point at existing examples.
    fn check(&self, name: &str) -> AttributionResult<()> {
        let len = self.examples.len();
        for (owner, selection) in &self.support {
            if *owner >= len {
                return Err(AttributionError::Dataset {
                    message: format!("{}: support selection for missing example {}", name, owner),
                });
            }
            if let Some(bad) = selection.indices.iter().find(|&&i| i >= len) {
                return Err(AttributionError::Dataset {
                    message: format!(
                        "{}: support selection of {} references missing example {}",
                        name, owner, bad
                    ),
                });
            }
        }
        Ok(())
    }
}

impl DatasetProvider for InMemoryDataset {
    fn example(&self, dataset: &str, index: usize) -> AttributionResult<Example> {
        let records = self.records(dataset)?;
        records
            .examples
            .get(index)
            .cloned()
            .ok_or_else(|| AttributionError::Dataset {
                message: format!(
                    "Index {} out of range for dataset '{}' ({} examples)",
                    index,
                    dataset,
                    records.examples.len()
                ),
            })
    }

    fn support_selection(&self, dataset: &str, index: usize) -> AttributionResult<Option<SupportSelection>> {
        Ok(self.records(dataset)?.support.get(&index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "banking": {
            "examples": [
                { "text": "please cancel my order", "category": "cancel" },
                { "text": "cancel my booking", "category": "cancel" },
                { "text": "track my package", "category": "track" }
            ],
            "support": {
                "0": { "indices": [1, 2], "similarities": [0.9, 0.2] }
            }
        }
    }"#;

    #[test]
    fn test_lookup() {
        let data = InMemoryDataset::from_json_str(SAMPLE).unwrap();
        assert_eq!(data.names(), vec!["banking"]);
        assert_eq!(data.example("banking", 2).unwrap().category, "track");

        let selection = data.support_selection("banking", 0).unwrap().unwrap();
        assert_eq!(selection.indices, vec![1, 2]);
        assert!(data.support_selection("banking", 1).unwrap().is_none());
    }

    #[test]
    fn test_unknown_dataset_and_index() {
        let data = InMemoryDataset::from_json_str(SAMPLE).unwrap();
        assert!(matches!(
            data.example("travel", 0),
            Err(AttributionError::Dataset { .. })
        ));
        let err = data.example("banking", 9).unwrap_err().to_string();
        assert!(err.contains("out of range"), "got: {}", err);
    }

    #[test]
    fn test_dangling_support_rejected() {
        let mut data = InMemoryDataset::new();
        let records = DatasetRecords {
            examples: vec![Example {
                text: "hello".into(),
                category: "greet".into(),
            }],
            support: HashMap::from([(
                0,
                SupportSelection {
                    indices: vec![3],
                    similarities: vec![1.0],
                },
            )]),
        };
        assert!(matches!(
            data.insert("tiny", records),
            Err(AttributionError::Dataset { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let data = InMemoryDataset::from_file(file.path()).unwrap();
        assert_eq!(data.example("banking", 1).unwrap().text, "cancel my booking");

        assert!(matches!(
            InMemoryDataset::from_file("/nonexistent/data.json"),
            Err(AttributionError::Dataset { .. })
        ));
    }
}
