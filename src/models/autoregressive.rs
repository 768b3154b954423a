//! Autoregressive models estimated by conditional least squares

use super::linalg::{least_squares, least_squares_multi};
use super::params::{opt_usize_param, str_param, usize_list_param};
use super::SeriesBackend;
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Deterministic terms of a time-series regression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    /// No deterministic term
    #[serde(rename = "n")]
    None,
    /// Constant
    #[serde(rename = "c")]
    Constant,
}

impl Trend {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "n" | "nc" => Ok(Trend::None),
            "c" => Ok(Trend::Constant),
            other => Err(SolverError::invalid(format!(
                "trend must be 'n' or 'c', got {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::None => "n",
            Trend::Constant => "c",
        }
    }

    pub fn terms(&self) -> usize {
        match self {
            Trend::None => 0,
            Trend::Constant => 1,
        }
    }
}

fn check_exog_rows(exog: Option<&Array2<f64>>, rows: usize) -> Result<()> {
    match exog {
        Some(x) if x.nrows() != rows => Err(SolverError::ShapeError {
            expected: format!("{} exogenous rows", rows),
            actual: format!("{} exogenous rows", x.nrows()),
        }),
        _ => Ok(()),
    }
}

/// Per-target coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArCoefficients {
    intercept: f64,
    lags: Vec<f64>,
    exog: Vec<f64>,
}

impl ArCoefficients {
    fn predict(&self, lag_terms: &[usize], history: &[f64], t: usize, exog_row: Option<&[f64]>) -> f64 {
        let mut value = self.intercept;
        for (coef, &lag) in self.lags.iter().zip(lag_terms) {
            value += coef * history[t - lag];
        }
        if let Some(row) = exog_row {
            value += self.exog.iter().zip(row).map(|(c, x)| c * x).sum::<f64>();
        }
        value
    }
}

/// Univariate autoregression fitted independently for every target,
/// with optional exogenous regressors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRegression {
    pub lags: Vec<usize>,
    pub trend: Trend,
    coefficients: Vec<ArCoefficients>,
    endog: Option<Array2<f64>>,
    exog: Option<Array2<f64>>,
}

impl AutoRegression {
    pub fn new(lags: Vec<usize>, trend: Trend) -> Result<Self> {
        let mut lags = lags;
        lags.sort_unstable();
        lags.dedup();
        if lags.is_empty() || lags[0] == 0 {
            return Err(SolverError::invalid("AR lags must be positive integers"));
        }
        Ok(Self {
            lags,
            trend,
            coefficients: Vec::new(),
            endog: None,
            exog: None,
        })
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let lags = match usize_list_param(params, "lags")? {
            // a scalar lag count means every lag up to it
            Some(lags) if params.get("lags").map_or(false, Value::is_u64) => (1..=lags[0]).collect(),
            Some(lags) => lags,
            None => vec![1],
        };
        Self::new(lags, Trend::parse(&str_param(params, "trend", "c")?)?)
    }

    fn max_lag(&self) -> usize {
        self.lags.last().copied().unwrap_or(1)
    }

    fn fitted_data(&self) -> Result<&Array2<f64>> {
        self.endog.as_ref().ok_or(SolverError::ModelNotFitted)
    }
}

impl SeriesBackend for AutoRegression {
    fn name(&self) -> &'static str {
        "AutoReg"
    }

    fn fit(&mut self, endog: &Array2<f64>, exog: Option<&Array2<f64>>) -> Result<()> {
        check_exog_rows(exog, endog.nrows())?;
        let n = endog.nrows();
        let p = self.max_lag();
        let n_exog = exog.map_or(0, |x| x.ncols());
        let n_params = self.trend.terms() + self.lags.len() + n_exog;
        if n <= p + n_params {
            return Err(SolverError::DataError(format!(
                "AR with lags {:?} needs more than {} observations, got {}",
                self.lags,
                p + n_params,
                n
            )));
        }

        let rows = n - p;
        let mut coefficients = Vec::with_capacity(endog.ncols());
        for target in endog.axis_iter(Axis(1)) {
            let mut design = Array2::zeros((rows, n_params));
            for r in 0..rows {
                let t = r + p;
                let mut c = 0;
                if self.trend == Trend::Constant {
                    design[[r, 0]] = 1.0;
                    c = 1;
                }
                for &lag in &self.lags {
                    design[[r, c]] = target[t - lag];
                    c += 1;
                }
                if let Some(x) = exog {
                    for j in 0..n_exog {
                        design[[r, c + j]] = x[[t, j]];
                    }
                }
            }
            let response = target.slice(ndarray::s![p..]).to_owned();
            let beta = least_squares(&design, &response, 0.0)?;
            let offset = self.trend.terms();
            coefficients.push(ArCoefficients {
                intercept: if offset == 1 { beta[0] } else { 0.0 },
                lags: beta.slice(ndarray::s![offset..offset + self.lags.len()]).to_vec(),
                exog: beta.slice(ndarray::s![offset + self.lags.len()..]).to_vec(),
            });
        }

        self.coefficients = coefficients;
        self.endog = Some(endog.clone());
        self.exog = exog.cloned();
        Ok(())
    }

    fn forecast(&self, steps: usize, exog: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        let endog = self.fitted_data()?;
        if self.exog.is_some() {
            match exog {
                Some(x) if x.nrows() >= steps => {}
                _ => {
                    return Err(SolverError::invalid(format!(
                        "forecasting {} steps requires {} rows of exogenous data",
                        steps, steps
                    )))
                }
            }
        }

        let n = endog.nrows();
        let mut out = Array2::zeros((steps, endog.ncols()));
        for (k, coefficients) in self.coefficients.iter().enumerate() {
            let mut history: Vec<f64> = endog.column(k).to_vec();
            for h in 0..steps {
                let row = exog.filter(|_| self.exog.is_some()).map(|x| x.row(h).to_vec());
                let value = coefficients.predict(&self.lags, &history, n + h, row.as_deref());
                history.push(value);
                out[[h, k]] = value;
            }
        }
        Ok(out)
    }

    fn fitted_values(&self) -> Result<Array2<f64>> {
        let endog = self.fitted_data()?;
        let p = self.max_lag();
        let mut out = Array2::from_elem(endog.raw_dim(), f64::NAN);
        for (k, coefficients) in self.coefficients.iter().enumerate() {
            let history = endog.column(k).to_vec();
            for t in p..endog.nrows() {
                let row = self.exog.as_ref().map(|x| x.row(t).to_vec());
                out[[t, k]] = coefficients.predict(&self.lags, &history, t, row.as_deref());
            }
        }
        Ok(out)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("lags".into(), json!(self.lags));
        params.insert("trend".into(), json!(self.trend.as_str()));
        params
    }
}

/// Vector autoregression over all targets jointly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorAutoRegression {
    /// Requested order; defaults to `12 * (n / 100)^(1/4)`
    pub maxlags: Option<usize>,
    pub trend: Trend,
    /// Order actually fitted
    k_ar: usize,
    /// `(trend terms + k_ar * k) x k`, lag blocks in order 1..=k_ar
    coefficients: Option<Array2<f64>>,
    endog: Option<Array2<f64>>,
}

impl VectorAutoRegression {
    pub fn new(maxlags: Option<usize>, trend: Trend) -> Self {
        Self {
            maxlags,
            trend,
            k_ar: 0,
            coefficients: None,
            endog: None,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(
            opt_usize_param(params, "maxlags")?,
            Trend::parse(&str_param(params, "trend", "c")?)?,
        ))
    }

    pub fn order(&self) -> usize {
        self.k_ar
    }

    fn regressors(&self, history: &Array2<f64>, t: usize) -> Array1<f64> {
        let k = history.ncols();
        let offset = self.trend.terms();
        let mut row = Array1::zeros(offset + self.k_ar * k);
        if offset == 1 {
            row[0] = 1.0;
        }
        for lag in 1..=self.k_ar {
            for j in 0..k {
                row[offset + (lag - 1) * k + j] = history[[t - lag, j]];
            }
        }
        row
    }

    fn fitted_parts(&self) -> Result<(&Array2<f64>, &Array2<f64>)> {
        match (&self.endog, &self.coefficients) {
            (Some(endog), Some(coefficients)) => Ok((endog, coefficients)),
            _ => Err(SolverError::ModelNotFitted),
        }
    }
}

impl SeriesBackend for VectorAutoRegression {
    fn name(&self) -> &'static str {
        "VAR"
    }

    fn fit(&mut self, endog: &Array2<f64>, exog: Option<&Array2<f64>>) -> Result<()> {
        if exog.is_some() {
            return Err(SolverError::unsupported(self.name(), "exogenous regressors"));
        }
        let (n, k) = endog.dim();
        let default_order = (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize;
        let mut order = self.maxlags.unwrap_or(default_order).max(1);
        while order > 0 && n <= order + self.trend.terms() + order * k {
            order -= 1;
        }
        if order == 0 {
            return Err(SolverError::DataError(format!(
                "too few observations ({}) for a VAR over {} series",
                n, k
            )));
        }
        self.k_ar = order;

        let rows = n - order;
        let width = self.trend.terms() + order * k;
        let mut design = Array2::zeros((rows, width));
        for r in 0..rows {
            design.row_mut(r).assign(&self.regressors(endog, r + order));
        }
        let response = endog.slice(ndarray::s![order.., ..]).to_owned();
        self.coefficients = Some(least_squares_multi(&design, &response)?);
        self.endog = Some(endog.clone());
        Ok(())
    }

    fn forecast(&self, steps: usize, exog: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        if exog.is_some() {
            return Err(SolverError::unsupported(self.name(), "exogenous regressors"));
        }
        let (endog, coefficients) = self.fitted_parts()?;
        let n = endog.nrows();
        let mut history = Array2::zeros((n + steps, endog.ncols()));
        history.slice_mut(ndarray::s![..n, ..]).assign(endog);
        for h in 0..steps {
            let next = self.regressors(&history, n + h).dot(coefficients);
            history.row_mut(n + h).assign(&next);
        }
        Ok(history.slice(ndarray::s![n.., ..]).to_owned())
    }

    fn fitted_values(&self) -> Result<Array2<f64>> {
        let (endog, coefficients) = self.fitted_parts()?;
        let mut out = Array2::from_elem(endog.raw_dim(), f64::NAN);
        for t in self.k_ar..endog.nrows() {
            out.row_mut(t).assign(&self.regressors(endog, t).dot(coefficients));
        }
        Ok(out)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("maxlags".into(), json!(self.maxlags));
        params.insert("trend".into(), json!(self.trend.as_str()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y_t = 1 + 0.5 y_{t-1}
    fn ar1_series(n: usize) -> Array2<f64> {
        let mut y = Array2::zeros((n, 1));
        y[[0, 0]] = 10.0;
        for t in 1..n {
            y[[t, 0]] = 1.0 + 0.5 * y[[t - 1, 0]] + if t % 2 == 0 { 0.01 } else { -0.01 };
        }
        y
    }

    #[test]
    fn test_ar_recovers_coefficients() {
        let y = ar1_series(60);
        let mut model = AutoRegression::new(vec![1], Trend::Constant).unwrap();
        model.fit(&y, None).unwrap();
        let forecast = model.forecast(3, None).unwrap();
        assert_eq!(forecast.dim(), (3, 1));
        // the process settles at 2
        assert!((forecast[[2, 0]] - 2.0).abs() < 0.1);

        let fitted = model.fitted_values().unwrap();
        assert!(fitted[[0, 0]].is_nan());
        assert!((fitted[[10, 0]] - y[[10, 0]]).abs() < 0.05);
    }

    #[test]
    fn test_ar_lags_param() {
        let params = json!({"lags": 3});
        let model = AutoRegression::from_params(params.as_object().unwrap()).unwrap();
        assert_eq!(model.lags, vec![1, 2, 3]);
        let params = json!({"lags": [2, 1, 2]});
        let model = AutoRegression::from_params(params.as_object().unwrap()).unwrap();
        assert_eq!(model.lags, vec![1, 2]);
        assert!(AutoRegression::new(vec![0], Trend::None).is_err());
    }

    #[test]
    fn test_ar_requires_future_exog() {
        let y = ar1_series(30);
        let x = Array2::from_shape_fn((30, 1), |(t, _)| t as f64);
        let mut model = AutoRegression::new(vec![1], Trend::Constant).unwrap();
        model.fit(&y, Some(&x)).unwrap();
        assert!(model.forecast(2, None).is_err());
        assert!(model.forecast(2, Some(&Array2::zeros((2, 1)))).is_ok());
    }

    #[test]
    fn test_var_order_is_clamped() {
        let mut y = Array2::zeros((12, 2));
        for t in 0..12 {
            y[[t, 0]] = (t as f64).sin();
            y[[t, 1]] = (t as f64 * 0.5).cos();
        }
        let mut model = VectorAutoRegression::new(Some(10), Trend::Constant);
        model.fit(&y, None).unwrap();
        assert!(model.order() >= 1 && model.order() < 5);
        assert_eq!(model.forecast(4, None).unwrap().dim(), (4, 2));
        assert!(model.fit(&y, Some(&Array2::zeros((12, 1)))).is_err());
    }
}
