//! Training sessions and the datasets they point at.

use super::problem::ProblemSpecification;
use crate::error::{Result, SolverError};
use crate::utils::DataLoader;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

/// Dataset name resolved by [`TrainSpecification::input_dataset`]
pub const INPUT_DATASET: &str = "input";

/// Descriptor of a tabular resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl Dataset {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            resource_uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Local path of the resource, without any `file://` scheme
    pub fn path(&self) -> Result<String> {
        let uri = self
            .resource_uri
            .as_deref()
            .ok_or_else(|| SolverError::invalid("dataset is missing a resource_uri"))?;
        Ok(uri.strip_prefix("file://").unwrap_or(uri).to_string())
    }

    /// Read the resource into a frame
    pub fn get_dataframe(&self) -> Result<DataFrame> {
        let path = self.path()?;
        let mut loader = DataLoader::new();
        if let Some(delimiter) = &self.delimiter {
            let byte = match delimiter.as_bytes() {
                [b] => *b,
                _ => {
                    return Err(SolverError::invalid(format!(
                        "delimiter must be a single byte, got {:?}",
                        delimiter
                    )))
                }
            };
            loader = loader.with_delimiter(byte);
        }
        let df = loader.load_csv(&path)?;
        info!(path = %path, rows = df.height(), "loaded dataset");
        Ok(df)
    }
}

/// Problem, metric and named datasets of one fitting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSpecification {
    pub problem: ProblemSpecification,
    #[serde(
        default,
        rename = "performanceMetric",
        skip_serializing_if = "Option::is_none"
    )]
    pub performance_metric: Option<Value>,
    #[serde(flatten)]
    pub datasets: Map<String, Value>,
}

impl TrainSpecification {
    pub fn new(problem: ProblemSpecification) -> Self {
        Self {
            problem,
            performance_metric: None,
            datasets: Map::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut spec: Self = serde_json::from_value(value)
            .map_err(|e| SolverError::invalid(format!("train specification: {}", e)))?;
        // Round-trip the problem through its own constructor for defaults
        let problem = serde_json::to_value(&spec.problem)?;
        spec.problem = ProblemSpecification::from_value(problem)?;
        Ok(spec)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SolverError::invalid(format!("train specification: {}", e)))?;
        Self::from_value(value)
    }

    pub fn with_dataset(mut self, name: &str, dataset: Dataset) -> Self {
        let value = serde_json::to_value(dataset).unwrap_or(Value::Null);
        self.datasets.insert(name.to_string(), value);
        self
    }

    pub fn with_performance_metric(mut self, metric: Value) -> Self {
        self.performance_metric = Some(metric);
        self
    }

    /// Metric of the session, defaulting to mean squared error
    pub fn performance_metric(&self) -> Value {
        self.performance_metric
            .clone()
            .unwrap_or_else(|| json!({"metric": "MEAN_SQUARED_ERROR"}))
    }

    pub fn dataset(&self, name: &str) -> Result<Dataset> {
        let value = self
            .datasets
            .get(name)
            .ok_or_else(|| SolverError::invalid(format!("unknown dataset: {}", name)))?;
        let dataset: Dataset = serde_json::from_value(value.clone())
            .map_err(|e| SolverError::invalid(format!("dataset {}: {}", name, e)))?;
        if dataset.resource_uri.is_none() {
            return Err(SolverError::invalid(format!(
                "dataset {} is missing a resource_uri",
                name
            )));
        }
        Ok(dataset)
    }

    pub fn input_dataset(&self) -> Result<Dataset> {
        self.dataset(INPUT_DATASET)
    }

    pub fn get_dataframe(&self, name: &str) -> Result<DataFrame> {
        self.dataset(name)?.get_dataframe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_resource_uri() {
        let train = TrainSpecification::from_value(json!({
            "problem": {"targets": ["y"]},
            "input": {"name": "no-uri"}
        }))
        .unwrap();
        assert!(matches!(
            train.input_dataset(),
            Err(SolverError::InvalidSpecification(_))
        ));
        assert!(train.dataset("other").is_err());
    }

    #[test]
    fn test_metric_default() {
        let train = TrainSpecification::new(ProblemSpecification::default());
        assert_eq!(train.performance_metric()["metric"], "MEAN_SQUARED_ERROR");
    }

    #[test]
    fn test_resolves_file_uri() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a;b\n1;2\n3;4").unwrap();
        let uri = format!("file://{}", file.path().display());
        let train = TrainSpecification::from_value(json!({
            "problem": {"targets": ["b"]},
            "input": {"resource_uri": uri, "delimiter": ";"}
        }))
        .unwrap();
        let df = train.get_dataframe(INPUT_DATASET).unwrap();
        assert_eq!(df.shape(), (2, 2));
    }
}
