//! The static strategy catalog.
//!
//! Entries are listed in a fixed order; search results preserve it.

use crate::preprocessing::PreprocessConfig;
use crate::specification::keywords::*;
use crate::specification::{ModelSpecification, PipelineSpecification, PreprocessSpecification};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One candidate: the keywords it applies to plus the pipeline it proposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<PreprocessSpecification>,
    pub model: ModelSpecification,
}

impl CatalogEntry {
    fn new(keywords: &[&str], library: &str, strategy: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            preprocess: None,
            model: ModelSpecification::new(library, strategy),
        }
    }

    fn with_param(mut self, key: &str, value: Value) -> Self {
        self.model = self.model.with_param(key, value);
        self
    }

    fn resampled(mut self) -> Self {
        self.preprocess = Some(PreprocessSpecification::Config(
            PreprocessConfig::default().with_resample(true),
        ));
        self
    }

    /// Every problem keyword is among the entry's keywords
    pub fn matches(&self, problem_keywords: &[String]) -> bool {
        problem_keywords.iter().all(|k| self.keywords.contains(k))
    }

    pub fn pipeline(&self) -> PipelineSpecification {
        PipelineSpecification {
            preprocess: self.preprocess.clone(),
            model: self.model.clone(),
        }
    }
}

const TABULAR: &str = "tabular";
const TIME_SERIES: &str = "time-series";

fn regression_prediction() -> Vec<CatalogEntry> {
    let kw = [REGRESSION, UNIVARIATE, PREDICTION];
    [
        "ORDINARY_LEAST_SQUARES",
        "RANDOM_FOREST_REGRESSOR",
        "K_NEIGHBORS_REGRESSOR",
        "DECISION_TREE_REGRESSOR",
        "LASSO_REGRESSION",
        "ELASTIC_NET",
        "RIDGE_REGRESSION",
    ]
    .iter()
    .map(|s| CatalogEntry::new(&kw, TABULAR, s))
    .collect()
}

fn classification_prediction() -> Vec<CatalogEntry> {
    let mut entries = vec![CatalogEntry::new(
        &[CLASSIFICATION, BINARY, UNIVARIATE, PREDICTION],
        TABULAR,
        "LOGISTIC_REGRESSION",
    )];
    for n_estimators in [10, 100] {
        entries.push(
            CatalogEntry::new(
                &[CLASSIFICATION, BINARY, MULTICLASS, UNIVARIATE, MULTIVARIATE, PREDICTION],
                TABULAR,
                "RANDOM_FOREST",
            )
            .with_param("n_estimators", json!(n_estimators)),
        );
    }
    entries.push(CatalogEntry::new(
        &[CLASSIFICATION, BINARY, MULTILABEL, UNIVARIATE, PREDICTION],
        TABULAR,
        "RIDGE_CLASSIFIER",
    ));
    for strategy in ["K_NEIGHBORS_CLASSIFIER", "DECISION_TREE_CLASSIFIER"] {
        entries.push(CatalogEntry::new(
            &[CLASSIFICATION, BINARY, MULTICLASS, MULTILABEL, UNIVARIATE, PREDICTION],
            TABULAR,
            strategy,
        ));
    }
    entries.push(CatalogEntry::new(
        &[CLASSIFICATION, BINARY, MULTICLASS, UNIVARIATE, PREDICTION],
        TABULAR,
        "GAUSSIAN_NAIVE_BAYES",
    ));
    entries
}

fn regression_forecasting() -> Vec<CatalogEntry> {
    let mut entries: Vec<CatalogEntry> = ["MEAN", "NAIVE", "DRIFT"]
        .iter()
        .map(|method| {
            CatalogEntry::new(
                &[REGRESSION, FORECASTING, UNIVARIATE, MULTIVARIATE],
                TABULAR,
                "BASELINE_REGRESSOR",
            )
            .with_param("method", json!(method))
            .resampled()
        })
        .collect();

    let orders = [[4, 1, 2], [1, 1, 1], [2, 1, 0], [0, 1, 2], [0, 1, 1], [0, 2, 2]];
    entries.extend(orders.iter().map(|order| {
        CatalogEntry::new(&[REGRESSION, FORECASTING, UNIVARIATE], TIME_SERIES, "SARIMAX")
            .with_param("order", json!(order))
            .resampled()
    }));

    entries.push(
        CatalogEntry::new(&[REGRESSION, FORECASTING, MULTIVARIATE], TIME_SERIES, "AR")
            .with_param("lags", json!([1, 2, 3]))
            .resampled(),
    );
    entries.push(
        CatalogEntry::new(&[REGRESSION, FORECASTING, MULTIVARIATE], TIME_SERIES, "VAR").resampled(),
    );
    entries
}

/// Process-wide catalog, built on first use and never mutated
pub static CATALOG: Lazy<Vec<CatalogEntry>> = Lazy::new(|| {
    let mut catalog = regression_prediction();
    catalog.extend(classification_prediction());
    catalog.extend(regression_forecasting());
    catalog
});
