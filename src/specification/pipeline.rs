//! Pipeline specifications: one preprocessing config paired with one model config.

use crate::error::{Result, SolverError};
use crate::preprocessing::PreprocessConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `preprocess` member of a pipeline.
///
/// `false` disables preprocessing; `true`, a preset name or an absent member
/// select the default configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreprocessSpecification {
    Enabled(bool),
    Preset(String),
    Config(PreprocessConfig),
}

impl PreprocessSpecification {
    pub fn config(&self) -> Option<PreprocessConfig> {
        match self {
            PreprocessSpecification::Enabled(false) => None,
            PreprocessSpecification::Enabled(true) | PreprocessSpecification::Preset(_) => {
                Some(PreprocessConfig::default())
            }
            PreprocessSpecification::Config(config) => Some(config.clone()),
        }
    }
}

/// Backend selection plus hyperparameters.
///
/// `strategy` is a strategy name for single-backend libraries and a nested
/// pipeline specification for the cross-sectional wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpecification {
    pub library: String,
    pub strategy: Value,
    #[serde(flatten)]
    pub hyperparameters: Map<String, Value>,
}

impl ModelSpecification {
    pub fn new(library: &str, strategy: &str) -> Self {
        Self {
            library: library.to_string(),
            strategy: Value::String(strategy.to_string()),
            hyperparameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.hyperparameters.insert(key.to_string(), value);
        self
    }

    pub fn strategy_name(&self) -> Result<&str> {
        self.strategy.as_str().ok_or_else(|| {
            SolverError::invalid(format!(
                "library {} expects a strategy name, got {}",
                self.library, self.strategy
            ))
        })
    }

    /// Nested pipeline carried by a cross-sectional model
    pub fn inner_pipeline(&self) -> Result<PipelineSpecification> {
        if !self.strategy.is_object() {
            return Err(SolverError::invalid(format!(
                "library {} expects a nested pipeline as its strategy",
                self.library
            )));
        }
        PipelineSpecification::from_value(self.strategy.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<PreprocessSpecification>,
    pub model: ModelSpecification,
}

impl PipelineSpecification {
    pub fn new(model: ModelSpecification) -> Self {
        Self {
            preprocess: None,
            model,
        }
    }

    pub fn with_preprocess(mut self, preprocess: PreprocessSpecification) -> Self {
        self.preprocess = Some(preprocess);
        self
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| SolverError::invalid(format!("pipeline specification: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SolverError::invalid(format!("pipeline specification: {}", e)))?;
        Self::from_value(value)
    }

    /// Effective preprocessing configuration; `None` when disabled
    pub fn preprocess_config(&self) -> Option<PreprocessConfig> {
        match &self.preprocess {
            None => Some(PreprocessConfig::default()),
            Some(spec) => spec.config(),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preprocess_forms() {
        let disabled = PipelineSpecification::from_value(json!({
            "preprocess": false,
            "model": {"library": "tabular", "strategy": "ORDINARY_LEAST_SQUARES"}
        }))
        .unwrap();
        assert!(disabled.preprocess_config().is_none());

        let absent = PipelineSpecification::from_value(json!({
            "model": {"library": "tabular", "strategy": "ORDINARY_LEAST_SQUARES"}
        }))
        .unwrap();
        assert_eq!(absent.preprocess_config(), Some(PreprocessConfig::default()));

        let resample = PipelineSpecification::from_value(json!({
            "preprocess": {"resample": true},
            "model": {"library": "tabular", "strategy": "BASELINE_REGRESSOR", "method": "DRIFT"}
        }))
        .unwrap();
        assert!(resample.preprocess_config().unwrap().resample);
        assert_eq!(resample.model.hyperparameters["method"], "DRIFT");

        let preset = PipelineSpecification::from_value(json!({
            "preprocess": "standard",
            "model": {"library": "tabular", "strategy": "RIDGE_REGRESSION"}
        }))
        .unwrap();
        assert!(preset.preprocess_config().is_some());
    }

    #[test]
    fn test_nested_strategy() {
        let inner = json!({"model": {"library": "tabular", "strategy": "ELASTIC_NET"}});
        let model = ModelSpecification {
            library: "cross-sectional".into(),
            strategy: inner,
            hyperparameters: Map::new(),
        };
        assert!(model.strategy_name().is_err());
        assert_eq!(
            model.inner_pipeline().unwrap().model.strategy_name().unwrap(),
            "ELASTIC_NET"
        );
    }

    #[test]
    fn test_missing_model_is_invalid() {
        assert!(matches!(
            PipelineSpecification::from_value(json!({"preprocess": true})),
            Err(SolverError::InvalidSpecification(_))
        ));
    }
}
