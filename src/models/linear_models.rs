//! Linear model implementations

use super::linalg::{least_squares, weighted_mean_axis0};
use super::params::{bool_param, f64_param, usize_param};
use super::{argmax_rows, n_classes, TabularBackend};
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

fn check_rows(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(SolverError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    Ok(())
}

/// Ordinary least squares, optionally L2-penalized (ridge) and sample-weighted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    pub fit_intercept: bool,
    /// L2 regularization strength; zero for plain least squares
    pub alpha: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            fit_intercept: true,
            alpha: 0.0,
        }
    }

    pub fn ridge(alpha: f64) -> Self {
        Self::new().with_alpha(alpha)
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn from_params(params: &Map<String, Value>, default_alpha: f64) -> Result<Self> {
        Ok(Self::new()
            .with_alpha(f64_param(params, "alpha", default_alpha)?)
            .with_fit_intercept(bool_param(params, "fit_intercept", true)?))
    }
}

impl TabularBackend for LinearRegression {
    fn name(&self) -> &'static str {
        if self.alpha > 0.0 {
            "Ridge"
        } else {
            "LinearRegression"
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        check_rows(x, y)?;
        let weights = sample_weight
            .cloned()
            .unwrap_or_else(|| Array1::ones(x.nrows()));

        let (x_mean, y_mean) = if self.fit_intercept {
            let total = weights.sum();
            let y_mean = if total > 0.0 { weights.dot(y) / total } else { 0.0 };
            (weighted_mean_axis0(x, &weights), y_mean)
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };

        // Scale centered rows by sqrt(w) so the normal equations are weighted
        let root_w = weights.mapv(|w| w.max(0.0).sqrt());
        let x_c = (x - &x_mean.clone().insert_axis(Axis(0))) * &root_w.clone().insert_axis(Axis(1));
        let y_c = (y - y_mean) * &root_w;

        let coefficients = least_squares(&x_c, &y_c, self.alpha)?;
        self.intercept = Some(if self.fit_intercept {
            y_mean - coefficients.dot(&x_mean)
        } else {
            0.0
        });
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(SolverError::ModelNotFitted)?;
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("fit_intercept".into(), json!(self.fit_intercept));
        if self.alpha > 0.0 {
            params.insert("alpha".into(), json!(self.alpha));
        }
        params
    }
}

/// Elastic net by coordinate descent; lasso is the `l1_ratio = 1` case.
///
/// Minimizes `1/(2n) ||y - Xw||^2 + alpha * l1_ratio * ||w||_1
/// + alpha * (1 - l1_ratio) / 2 * ||w||^2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticNet {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    pub fit_intercept: bool,
    pub alpha: f64,
    pub l1_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            coefficients: None,
            intercept: None,
            fit_intercept: true,
            alpha,
            l1_ratio,
            max_iter: 1000,
            tol: 1e-4,
        }
    }

    pub fn lasso(alpha: f64) -> Self {
        Self::new(alpha, 1.0)
    }

    pub fn from_params(params: &Map<String, Value>, lasso: bool) -> Result<Self> {
        let l1_ratio = if lasso {
            1.0
        } else {
            f64_param(params, "l1_ratio", 0.5)?
        };
        if !(0.0..=1.0).contains(&l1_ratio) {
            return Err(SolverError::invalid("l1_ratio must lie in [0, 1]"));
        }
        let mut model = Self::new(f64_param(params, "alpha", 1.0)?, l1_ratio);
        model.max_iter = usize_param(params, "max_iter", 1000)?;
        model.tol = f64_param(params, "tol", 1e-4)?;
        model.fit_intercept = bool_param(params, "fit_intercept", true)?;
        Ok(model)
    }

    fn soft_threshold(val: f64, threshold: f64) -> f64 {
        if val > threshold {
            val - threshold
        } else if val < -threshold {
            val + threshold
        } else {
            0.0
        }
    }
}

impl TabularBackend for ElasticNet {
    fn name(&self) -> &'static str {
        if self.l1_ratio >= 1.0 {
            "Lasso"
        } else {
            "ElasticNet"
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _sample_weight: Option<&Array1<f64>>) -> Result<()> {
        check_rows(x, y)?;
        let n_samples = x.nrows();
        let n_features = x.ncols();

        let (x_c, y_c, x_mean, y_mean) = if self.fit_intercept {
            let xm = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
            let ym = y.mean().unwrap_or(0.0);
            (x - &xm.clone().insert_axis(Axis(0)), y - ym, xm, ym)
        } else {
            (x.clone(), y.clone(), Array1::zeros(n_features), 0.0)
        };

        let col_norms: Vec<f64> = (0..n_features)
            .map(|j| x_c.column(j).mapv(|v| v * v).sum())
            .collect();
        let l1 = self.alpha * self.l1_ratio * n_samples as f64;
        let l2 = self.alpha * (1.0 - self.l1_ratio) * n_samples as f64;

        let mut w = Array1::zeros(n_features);
        let mut r = y_c.clone();
        for _ in 0..self.max_iter {
            let mut max_change = 0.0f64;
            for j in 0..n_features {
                if col_norms[j] < 1e-15 {
                    continue;
                }
                let old = w[j];
                let rho = x_c.column(j).dot(&r) + col_norms[j] * old;
                w[j] = Self::soft_threshold(rho, l1) / (col_norms[j] + l2);
                let delta = old - w[j];
                if delta != 0.0 {
                    r = r + &(&x_c.column(j) * delta);
                }
                max_change = max_change.max(delta.abs());
            }
            if max_change < self.tol {
                break;
            }
        }

        self.intercept = Some(y_mean - w.dot(&x_mean));
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(SolverError::ModelNotFitted)?;
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("alpha".into(), json!(self.alpha));
        if self.l1_ratio < 1.0 {
            params.insert("l1_ratio".into(), json!(self.l1_ratio));
        }
        params.insert("max_iter".into(), json!(self.max_iter));
        params.insert("tol".into(), json!(self.tol));
        params.insert("fit_intercept".into(), json!(self.fit_intercept));
        params
    }
}

/// Binary logistic model fitted by gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryLogit {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl BinaryLogit {
    fn sigmoid(z: f64) -> f64 {
        1.0 / (1.0 + (-z).exp())
    }

    fn probability(&self, x: &Array2<f64>) -> Array1<f64> {
        (x.dot(&self.coefficients) + self.intercept).mapv(Self::sigmoid)
    }
}

/// Logistic regression; multiclass problems are fitted one-vs-rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub fit_intercept: bool,
    pub learning_rate: f64,
    n_classes: usize,
    models: Vec<BinaryLogit>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            fit_intercept: true,
            learning_rate: 0.1,
            n_classes: 0,
            models: Vec::new(),
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let mut model = Self::new();
        model.c = f64_param(params, "C", 1.0)?;
        if model.c <= 0.0 {
            return Err(SolverError::invalid("C must be positive"));
        }
        model.max_iter = usize_param(params, "max_iter", 1000)?;
        model.tol = f64_param(params, "tol", 1e-6)?;
        model.fit_intercept = bool_param(params, "fit_intercept", true)?;
        Ok(model)
    }

    fn fit_binary(&self, x: &Array2<f64>, y: &Array1<f64>) -> BinaryLogit {
        let n_samples = x.nrows() as f64;
        let alpha = 1.0 / (self.c * n_samples);
        let mut weights = Array1::zeros(x.ncols());
        let mut bias = 0.0;

        for _ in 0..self.max_iter {
            let predictions = (x.dot(&weights) + bias).mapv(BinaryLogit::sigmoid);
            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n_samples + alpha * &weights;
            let db = if self.fit_intercept {
                errors.mean().unwrap_or(0.0)
            } else {
                0.0
            };

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }
            weights = weights - self.learning_rate * dw;
            bias -= self.learning_rate * db;
        }
        BinaryLogit {
            coefficients: weights,
            intercept: bias,
        }
    }
}

impl TabularBackend for LogisticRegression {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _sample_weight: Option<&Array1<f64>>) -> Result<()> {
        check_rows(x, y)?;
        self.n_classes = n_classes(y).max(2);
        self.models = if self.n_classes == 2 {
            vec![self.fit_binary(x, y)]
        } else {
            (0..self.n_classes)
                .map(|k| {
                    let indicator = y.mapv(|v| if v as usize == k { 1.0 } else { 0.0 });
                    self.fit_binary(x, &indicator)
                })
                .collect()
        };
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.models.is_empty() {
            return Err(SolverError::ModelNotFitted);
        }
        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        if self.n_classes == 2 {
            let p = self.models[0].probability(x);
            proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
            proba.column_mut(1).assign(&p);
        } else {
            for (k, model) in self.models.iter().enumerate() {
                proba.column_mut(k).assign(&model.probability(x));
            }
            for mut row in proba.rows_mut() {
                let total = row.sum();
                if total > 0.0 {
                    row /= total;
                }
            }
        }
        Ok(proba)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("C".into(), json!(self.c));
        params.insert("max_iter".into(), json!(self.max_iter));
        params.insert("tol".into(), json!(self.tol));
        params.insert("fit_intercept".into(), json!(self.fit_intercept));
        params
    }
}

/// Ridge regression on `{-1, +1}` class indicators. Offers a decision
/// function but no probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeClassifier {
    pub alpha: f64,
    pub fit_intercept: bool,
    n_classes: usize,
    models: Vec<LinearRegression>,
}

impl RidgeClassifier {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            fit_intercept: true,
            n_classes: 0,
            models: Vec::new(),
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let mut model = Self::new(f64_param(params, "alpha", 1.0)?);
        model.fit_intercept = bool_param(params, "fit_intercept", true)?;
        Ok(model)
    }
}

impl TabularBackend for RidgeClassifier {
    fn name(&self) -> &'static str {
        "RidgeClassifier"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        check_rows(x, y)?;
        self.n_classes = n_classes(y).max(2);
        let targets: Vec<usize> = if self.n_classes == 2 { vec![1] } else { (0..self.n_classes).collect() };
        self.models = targets
            .into_iter()
            .map(|k| {
                let signed = y.mapv(|v| if v as usize == k { 1.0 } else { -1.0 });
                let mut model = LinearRegression::ridge(self.alpha).with_fit_intercept(self.fit_intercept);
                model.fit(x, &signed, sample_weight)?;
                Ok(model)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(argmax_rows(&self.decision_function(x)?))
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.models.is_empty() {
            return Err(SolverError::ModelNotFitted);
        }
        let mut scores = Array2::zeros((x.nrows(), self.n_classes));
        if self.n_classes == 2 {
            let d = self.models[0].predict(x)?;
            scores.column_mut(0).assign(&d.mapv(|v| -v));
            scores.column_mut(1).assign(&d);
        } else {
            for (k, model) in self.models.iter().enumerate() {
                scores.column_mut(k).assign(&model.predict(x)?);
            }
        }
        Ok(scores)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("alpha".into(), json!(self.alpha));
        params.insert("fit_intercept".into(), json!(self.fit_intercept));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ols_recovers_line() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let mut model = LinearRegression::new();
        model.fit(&x, &y, None).unwrap();
        let pred = model.predict(&array![[4.0]]).unwrap();
        assert!((pred[0] - 9.0).abs() < 1e-8);
    }

    #[test]
    fn test_weights_favor_heavy_rows() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![0.0, 1.0, 10.0];
        let mut unweighted = LinearRegression::new();
        unweighted.fit(&x, &y, None).unwrap();
        let mut weighted = LinearRegression::new();
        weighted.fit(&x, &y, Some(&array![1.0, 1.0, 0.0])).unwrap();
        assert!((weighted.coefficients.as_ref().unwrap()[0] - 1.0).abs() < 1e-6);
        assert!(unweighted.coefficients.as_ref().unwrap()[0] > 4.0);
    }

    #[test]
    fn test_lasso_shrinks_to_zero() {
        let x = array![[1.0, 0.1], [2.0, -0.1], [3.0, 0.1], [4.0, -0.1]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let mut model = ElasticNet::lasso(0.1);
        model.fit(&x, &y, None).unwrap();
        let w = model.coefficients.as_ref().unwrap();
        assert!(w[0] > 1.5);
        assert_eq!(w[1], 0.0);
    }

    #[test]
    fn test_logistic_separates() {
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = LogisticRegression::new();
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        let proba = model.predict_proba(&x).unwrap();
        assert!((proba.row(0).sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ridge_classifier_has_no_proba() {
        let x = array![[0.0], [0.1], [5.0], [5.1], [10.0], [10.1]];
        let y = array![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let mut model = RidgeClassifier::new(0.01);
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.decision_function(&x).unwrap().ncols(), 3);
        assert!(matches!(
            model.predict_proba(&x),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }
}
