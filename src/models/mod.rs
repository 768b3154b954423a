//! Backend model implementations
//!
//! Tabular backends implement [`TabularBackend`] over dense `ndarray`
//! matrices; classification backends see labels encoded as `0..k`.
//! Time-series backends implement [`SeriesBackend`] over a matrix of
//! regularly spaced observations.

pub mod arima;
pub mod autoregressive;
pub mod baseline;
pub mod decision_tree;
pub mod differencing;
pub mod knn;
pub mod linalg;
pub mod linear_models;
pub mod naive_bayes;
pub mod params;
pub mod random_forest;

pub use arima::Sarimax;
pub use autoregressive::{AutoRegression, VectorAutoRegression};
pub use baseline::{BaselineMethod, BaselineRegressor};
pub use decision_tree::DecisionTree;
pub use knn::KNeighbors;
pub use linear_models::{ElasticNet, LinearRegression, LogisticRegression, RidgeClassifier};
pub use naive_bayes::GaussianNaiveBayes;
pub use random_forest::RandomForest;

use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fit/predict contract of a tabular model
pub trait TabularBackend {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Class probabilities, one column per encoded label
    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Array2<f64>> {
        Err(SolverError::unsupported(self.name(), "predict_proba"))
    }

    /// Per-class confidence scores, one column per encoded label
    fn decision_function(&self, _x: &Array2<f64>) -> Result<Array2<f64>> {
        Err(SolverError::unsupported(self.name(), "decision_function"))
    }

    /// In-sample predictions for the rows seen by the last `fit`
    fn fitted_values(&self) -> Result<Array1<f64>> {
        Err(SolverError::unsupported(self.name(), "fitted_values"))
    }

    fn get_params(&self) -> Map<String, Value>;
}

/// Index of the largest value in each row, as a float label
pub fn argmax_rows(scores: &Array2<f64>) -> Array1<f64> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f64::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0 as f64
        })
        .collect()
}

/// Number of classes in an encoded label vector
pub fn n_classes(y: &Array1<f64>) -> usize {
    y.iter().fold(0.0_f64, |m, &v| m.max(v)) as usize + 1
}

/// Every tabular model reachable from a strategy name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TabularModel {
    Linear(LinearRegression),
    ElasticNet(ElasticNet),
    Logistic(LogisticRegression),
    RidgeClassifier(RidgeClassifier),
    Tree(DecisionTree),
    Forest(RandomForest),
    Neighbors(KNeighbors),
    NaiveBayes(GaussianNaiveBayes),
    Baseline(BaselineRegressor),
}

impl TabularModel {
    /// Construct the model named by `strategy` from already filtered hyperparameters
    pub fn build(strategy: &str, params: &Map<String, Value>) -> Result<Self> {
        let model = match strategy {
            "ORDINARY_LEAST_SQUARES" => Self::Linear(LinearRegression::from_params(params, 0.0)?),
            "RIDGE_REGRESSION" => Self::Linear(LinearRegression::from_params(params, 1.0)?),
            "LASSO_REGRESSION" => Self::ElasticNet(ElasticNet::from_params(params, true)?),
            "ELASTIC_NET" => Self::ElasticNet(ElasticNet::from_params(params, false)?),
            "LOGISTIC_REGRESSION" => Self::Logistic(LogisticRegression::from_params(params)?),
            "RIDGE_CLASSIFIER" => Self::RidgeClassifier(RidgeClassifier::from_params(params)?),
            "DECISION_TREE_CLASSIFIER" => Self::Tree(DecisionTree::from_params(params, true)?),
            "DECISION_TREE_REGRESSOR" => Self::Tree(DecisionTree::from_params(params, false)?),
            "RANDOM_FOREST" => Self::Forest(RandomForest::from_params(params, true)?),
            "RANDOM_FOREST_REGRESSOR" => Self::Forest(RandomForest::from_params(params, false)?),
            "K_NEIGHBORS_CLASSIFIER" => Self::Neighbors(KNeighbors::from_params(params, true)?),
            "K_NEIGHBORS_REGRESSOR" => Self::Neighbors(KNeighbors::from_params(params, false)?),
            "GAUSSIAN_NAIVE_BAYES" => Self::NaiveBayes(GaussianNaiveBayes::from_params(params)?),
            "BASELINE_REGRESSOR" => Self::Baseline(BaselineRegressor::from_params(params)?),
            other => {
                return Err(SolverError::invalid(format!(
                    "unknown tabular strategy: {}",
                    other
                )))
            }
        };
        Ok(model)
    }

    fn backend(&self) -> &dyn TabularBackend {
        match self {
            Self::Linear(m) => m,
            Self::ElasticNet(m) => m,
            Self::Logistic(m) => m,
            Self::RidgeClassifier(m) => m,
            Self::Tree(m) => m,
            Self::Forest(m) => m,
            Self::Neighbors(m) => m,
            Self::NaiveBayes(m) => m,
            Self::Baseline(m) => m,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn TabularBackend {
        match self {
            Self::Linear(m) => m,
            Self::ElasticNet(m) => m,
            Self::Logistic(m) => m,
            Self::RidgeClassifier(m) => m,
            Self::Tree(m) => m,
            Self::Forest(m) => m,
            Self::Neighbors(m) => m,
            Self::NaiveBayes(m) => m,
            Self::Baseline(m) => m,
        }
    }
}

impl TabularBackend for TabularModel {
    fn name(&self) -> &'static str {
        self.backend().name()
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        self.backend_mut().fit(x, y, sample_weight)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.backend().predict(x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.backend().predict_proba(x)
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.backend().decision_function(x)
    }

    fn fitted_values(&self) -> Result<Array1<f64>> {
        self.backend().fitted_values()
    }

    fn get_params(&self) -> Map<String, Value> {
        self.backend().get_params()
    }
}

/// Fit/forecast contract of a time-series model.
///
/// `endog` holds one column per target in time order; `exog`, when given,
/// has the same number of rows.
pub trait SeriesBackend {
    fn name(&self) -> &'static str;

    fn fit(&mut self, endog: &Array2<f64>, exog: Option<&Array2<f64>>) -> Result<()>;

    /// Values for the `steps` periods following the fitted sample
    fn forecast(&self, steps: usize, exog: Option<&Array2<f64>>) -> Result<Array2<f64>>;

    /// In-sample one-step predictions; NaN where no prediction is defined
    fn fitted_values(&self) -> Result<Array2<f64>>;

    fn get_params(&self) -> Map<String, Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SeriesModel {
    Ar(AutoRegression),
    Var(VectorAutoRegression),
    Sarimax(Sarimax),
}

impl SeriesModel {
    pub fn build(strategy: &str, params: &Map<String, Value>) -> Result<Self> {
        match strategy {
            "AR" => Ok(Self::Ar(AutoRegression::from_params(params)?)),
            "VAR" => Ok(Self::Var(VectorAutoRegression::from_params(params)?)),
            "SARIMAX" => Ok(Self::Sarimax(Sarimax::from_params(params)?)),
            other => Err(SolverError::invalid(format!(
                "unknown time-series strategy: {}",
                other
            ))),
        }
    }

    fn backend(&self) -> &dyn SeriesBackend {
        match self {
            Self::Ar(m) => m,
            Self::Var(m) => m,
            Self::Sarimax(m) => m,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn SeriesBackend {
        match self {
            Self::Ar(m) => m,
            Self::Var(m) => m,
            Self::Sarimax(m) => m,
        }
    }
}

impl SeriesBackend for SeriesModel {
    fn name(&self) -> &'static str {
        self.backend().name()
    }

    fn fit(&mut self, endog: &Array2<f64>, exog: Option<&Array2<f64>>) -> Result<()> {
        self.backend_mut().fit(endog, exog)
    }

    fn forecast(&self, steps: usize, exog: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        self.backend().forecast(steps, exog)
    }

    fn fitted_values(&self) -> Result<Array2<f64>> {
        self.backend().fitted_values()
    }

    fn get_params(&self) -> Map<String, Value> {
        self.backend().get_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_argmax_and_classes() {
        let scores = array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0]];
        assert_eq!(argmax_rows(&scores).to_vec(), vec![1.0, 0.0]);
        assert_eq!(n_classes(&array![0.0, 2.0, 1.0]), 3);
    }

    #[test]
    fn test_build_by_strategy() {
        let params = json!({"n_neighbors": 2});
        let model = TabularModel::build("K_NEIGHBORS_REGRESSOR", params.as_object().unwrap()).unwrap();
        assert_eq!(model.name(), "KNeighborsRegressor");
        assert!(TabularModel::build("SUPPORT_VECTOR_REGRESSION", &Map::new()).is_err());
        assert!(SeriesModel::build("VAR", &Map::new()).is_ok());
    }

    #[test]
    fn test_model_survives_serde() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![1.0, 3.0, 5.0];
        let mut model = TabularModel::build("ORDINARY_LEAST_SQUARES", &Map::new()).unwrap();
        model.fit(&x, &y, None).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: TabularModel = serde_json::from_str(&json).unwrap();
        let pred = restored.predict(&array![[3.0]]).unwrap();
        assert!((pred[0] - 7.0).abs() < 1e-8);
    }
}
