//! K-Nearest Neighbors implementation
//!
//! One struct covers both the classifier and the regressor; classification
//! stores labels `0..k` and votes, regression averages.

use super::params::{str_param, usize_param};
use super::{argmax_rows, n_classes, TabularBackend};
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum WeightScheme {
    #[default]
    Uniform,
    /// Inverse distance
    Distance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNeighbors {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub weights: WeightScheme,
    is_classification: bool,
    n_classes: usize,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl KNeighbors {
    pub fn new(n_neighbors: usize, classification: bool) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
            is_classification: classification,
            n_classes: 0,
            x_train: None,
            y_train: None,
        }
    }

    pub fn from_params(params: &Map<String, Value>, classification: bool) -> Result<Self> {
        let mut knn = Self::new(usize_param(params, "n_neighbors", 5)?, classification);
        knn.weights = match str_param(params, "weights", "uniform")?.as_str() {
            "uniform" => WeightScheme::Uniform,
            "distance" => WeightScheme::Distance,
            other => return Err(SolverError::invalid(format!("unknown weights: {}", other))),
        };
        knn.metric = match str_param(params, "metric", "euclidean")?.as_str() {
            "euclidean" | "minkowski" => DistanceMetric::Euclidean,
            "manhattan" => DistanceMetric::Manhattan,
            other => return Err(SolverError::invalid(format!("unknown metric: {}", other))),
        };
        Ok(knn)
    }

    pub fn with_weights(mut self, weights: WeightScheme) -> Self {
        self.weights = weights;
        self
    }

    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.metric {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
        }
    }

    /// (distance, label) of the nearest training rows; ties keep training order
    fn neighbors(&self, sample: ArrayView1<f64>, x_train: &Array2<f64>, y_train: &Array1<f64>) -> Vec<(f64, f64)> {
        let mut all: Vec<(f64, f64)> = x_train
            .rows()
            .into_iter()
            .zip(y_train.iter())
            .map(|(row, &label)| (self.distance(sample, row), label))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0));
        all.truncate(self.n_neighbors);
        all
    }

    fn weight(&self, distance: f64) -> f64 {
        match self.weights {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance => 1.0 / distance.max(1e-12),
        }
    }

    fn trained(&self) -> Result<(&Array2<f64>, &Array1<f64>)> {
        match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(SolverError::ModelNotFitted),
        }
    }

    fn class_votes(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (x_train, y_train) = self.trained()?;
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let mut votes = vec![0.0; self.n_classes];
                for (d, label) in self.neighbors(x.row(i), x_train, y_train) {
                    if let Some(v) = votes.get_mut(label as usize) {
                        *v += self.weight(d);
                    }
                }
                let total: f64 = votes.iter().sum();
                if total > 0.0 {
                    votes.iter_mut().for_each(|v| *v /= total);
                }
                votes
            })
            .collect();
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (r, row) in rows.into_iter().enumerate() {
            for (c, v) in row.into_iter().enumerate() {
                out[[r, c]] = v;
            }
        }
        Ok(out)
    }
}

impl TabularBackend for KNeighbors {
    fn name(&self) -> &'static str {
        if self.is_classification {
            "KNeighborsClassifier"
        } else {
            "KNeighborsRegressor"
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _sample_weight: Option<&Array1<f64>>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(SolverError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(SolverError::DataError("no training rows".to_string()));
        }
        self.n_classes = if self.is_classification { n_classes(y) } else { 0 };
        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.is_classification {
            return Ok(argmax_rows(&self.class_votes(x)?));
        }
        let (x_train, y_train) = self.trained()?;
        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let (mut num, mut den) = (0.0, 0.0);
                for (d, label) in self.neighbors(x.row(i), x_train, y_train) {
                    let w = self.weight(d);
                    num += w * label;
                    den += w;
                }
                if den > 0.0 {
                    num / den
                } else {
                    f64::NAN
                }
            })
            .collect();
        Ok(Array1::from_vec(predictions))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_classification {
            return Err(SolverError::unsupported(self.name(), "predict_proba"));
        }
        self.class_votes(x)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("n_neighbors".into(), json!(self.n_neighbors));
        let weights = match self.weights {
            WeightScheme::Uniform => "uniform",
            WeightScheme::Distance => "distance",
        };
        params.insert("weights".into(), json!(weights));
        let metric = match self.metric {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Manhattan => "manhattan",
        };
        params.insert("metric".into(), json!(metric));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_knn_classifier() {
        let x = array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [5.0, 5.0], [5.1, 5.0], [5.0, 5.1]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut knn = KNeighbors::new(3, true);
        knn.fit(&x, &y, None).unwrap();
        let pred = knn.predict(&array![[0.05, 0.05], [4.9, 5.2]]).unwrap();
        assert_eq!(pred.to_vec(), vec![0.0, 1.0]);
        let proba = knn.predict_proba(&array![[0.05, 0.05]]).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_knn_regressor() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let y = array![0.0, 1.0, 2.0, 10.0];
        let mut knn = KNeighbors::new(2, false);
        knn.fit(&x, &y, None).unwrap();
        let pred = knn.predict(&array![[0.4]]).unwrap();
        assert!((pred[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_distance_weighting_prefers_closer() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 10.0];
        let mut knn = KNeighbors::new(2, false).with_weights(WeightScheme::Distance);
        knn.fit(&x, &y, None).unwrap();
        assert!(knn.predict(&array![[0.9]]).unwrap()[0] > 5.0);
    }
}
