//! Gaussian Naive Bayes for continuous features

use super::params::f64_param;
use super::{n_classes, TabularBackend};
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    /// Per-class feature means, indexed by label
    means: Vec<Vec<f64>>,
    variances: Vec<Vec<f64>>,
    priors: Vec<f64>,
    /// Fraction of the largest feature variance added to every variance
    pub var_smoothing: f64,
    is_fitted: bool,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self {
            means: Vec::new(),
            variances: Vec::new(),
            priors: Vec::new(),
            var_smoothing: 1e-9,
            is_fitted: false,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            var_smoothing: f64_param(params, "var_smoothing", 1e-9)?,
            ..Self::new()
        })
    }

    /// Joint log likelihood per class
    pub fn predict_log_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let k = self.priors.len();
        let mut out = Array2::from_elem((x.nrows(), k), f64::NEG_INFINITY);
        for (r, sample) in x.rows().into_iter().enumerate() {
            for c in 0..k {
                if self.priors[c] <= 0.0 {
                    continue;
                }
                let mut log_likelihood = self.priors[c].ln();
                for (j, &v) in sample.iter().enumerate() {
                    let mean = self.means[c][j];
                    let var = self.variances[c][j];
                    log_likelihood -= 0.5 * (2.0 * PI * var).ln() + (v - mean).powi(2) / (2.0 * var);
                }
                out[[r, c]] = log_likelihood;
            }
        }
        Ok(out)
    }
}

impl TabularBackend for GaussianNaiveBayes {
    fn name(&self) -> &'static str {
        "GaussianNB"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(SolverError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        let k = n_classes(y);
        let n_features = x.ncols();
        let weights = sample_weight
            .cloned()
            .unwrap_or_else(|| Array1::ones(y.len()));

        let mut totals = vec![0.0; k];
        let mut means = vec![vec![0.0; n_features]; k];
        for (r, &label) in y.iter().enumerate() {
            let c = label as usize;
            totals[c] += weights[r];
            for j in 0..n_features {
                means[c][j] += weights[r] * x[[r, j]];
            }
        }
        for c in 0..k {
            if totals[c] > 0.0 {
                means[c].iter_mut().for_each(|m| *m /= totals[c]);
            }
        }

        let mut variances = vec![vec![0.0; n_features]; k];
        for (r, &label) in y.iter().enumerate() {
            let c = label as usize;
            for j in 0..n_features {
                variances[c][j] += weights[r] * (x[[r, j]] - means[c][j]).powi(2);
            }
        }

        let largest_variance = x
            .columns()
            .into_iter()
            .map(|col| col.var(0.0))
            .fold(0.0_f64, f64::max);
        let epsilon = (self.var_smoothing * largest_variance).max(1e-12);
        for c in 0..k {
            for v in variances[c].iter_mut() {
                if totals[c] > 0.0 {
                    *v /= totals[c];
                }
                *v += epsilon;
            }
        }

        let weight_total: f64 = totals.iter().sum();
        self.priors = totals.iter().map(|t| t / weight_total.max(1e-300)).collect();
        self.means = means;
        self.variances = variances;
        self.is_fitted = true;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(super::argmax_rows(&self.predict_log_proba(x)?))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut log_proba = self.predict_log_proba(x)?;
        for mut row in log_proba.rows_mut() {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let total = row.sum();
            row /= total;
        }
        Ok(log_proba)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("var_smoothing".into(), json!(self.var_smoothing));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_gaussian_nb() {
        let x = array![[1.0, 2.0], [1.2, 1.8], [0.8, 2.1], [6.0, 8.0], [6.2, 7.9], [5.8, 8.1]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut nb = GaussianNaiveBayes::new();
        nb.fit(&x, &y, None).unwrap();
        assert_eq!(nb.predict(&x).unwrap(), y);

        let proba = nb.predict_proba(&array![[1.0, 2.0]]).unwrap();
        assert!(proba[[0, 0]] > 0.99);
        assert!((proba.row(0).sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unfitted() {
        let nb = GaussianNaiveBayes::new();
        assert!(nb.predict(&array![[0.0]]).is_err());
    }
}
