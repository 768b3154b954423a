//! Non-seasonal ARIMA with exogenous regressors, estimated by the
//! Hannan-Rissanen two-stage regression.
//!
//! The model is fitted on the `d`-times differenced series `w`:
//!
//! ```text
//! w_t = c + b'x_t + sum_i phi_i w_{t-i} + sum_j theta_j e_{t-j} + e_t
//! ```
//!
//! Stage one fits a long autoregression to estimate the innovations `e`;
//! stage two regresses `w_t` on its own lags and the lagged innovation
//! estimates. Regressors are differenced with the series.

use super::autoregressive::Trend;
use super::differencing::Differencer;
use super::linalg::least_squares;
use super::params::{str_param, usize_list_param};
use super::SeriesBackend;
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArimaFit {
    intercept: f64,
    exog: Vec<f64>,
    ar: Vec<f64>,
    ma: Vec<f64>,
    /// First index of `w` with a modelled prediction
    start: usize,
    level: Vec<f64>,
    diffed: Vec<f64>,
    diffed_exog: Option<Array2<f64>>,
    residuals: Vec<f64>,
    endog_differencer: Differencer,
    exog_differencers: Vec<Differencer>,
}

impl ArimaFit {
    fn one_step(&self, w: &[f64], e: &[f64], t: usize, x: Option<Vec<f64>>) -> f64 {
        let mut value = self.intercept;
        if let Some(x) = x {
            value += self.exog.iter().zip(&x).map(|(b, v)| b * v).sum::<f64>();
        }
        for (i, phi) in self.ar.iter().enumerate() {
            value += phi * w[t - i - 1];
        }
        for (j, theta) in self.ma.iter().enumerate() {
            value += theta * e[t - j - 1];
        }
        value
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sarimax {
    pub order: ArimaOrder,
    pub trend: Trend,
    fit: Option<ArimaFit>,
}

impl Sarimax {
    pub fn new(p: usize, d: usize, q: usize, trend: Trend) -> Self {
        Self {
            order: ArimaOrder { p, d, q },
            trend,
            fit: None,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        if let Some(seasonal) = usize_list_param(params, "seasonal_order")? {
            if seasonal.iter().any(|&v| v != 0) {
                return Err(SolverError::unsupported("SARIMAX", "seasonal_order"));
            }
        }
        let order = usize_list_param(params, "order")?.unwrap_or_else(|| vec![1, 0, 0]);
        let [p, d, q] = order[..] else {
            return Err(SolverError::invalid(format!(
                "SARIMAX order must be [p, d, q], got {:?}",
                order
            )));
        };
        Ok(Self::new(p, d, q, Trend::parse(&str_param(params, "trend", "n")?)?))
    }

    fn fitted(&self) -> Result<&ArimaFit> {
        self.fit.as_ref().ok_or(SolverError::ModelNotFitted)
    }

    /// Residuals of a long autoregression on `w`; zero where undefined
    fn long_ar_residuals(w: &[f64], long: usize) -> Result<Vec<f64>> {
        let rows = w.len() - long;
        let mut design = Array2::zeros((rows, long + 1));
        for r in 0..rows {
            let t = r + long;
            design[[r, 0]] = 1.0;
            for i in 1..=long {
                design[[r, i]] = w[t - i];
            }
        }
        let response = Array1::from_iter(w[long..].iter().copied());
        let beta = least_squares(&design, &response, 0.0)?;
        let fitted = design.dot(&beta);
        let mut residuals = vec![0.0; w.len()];
        for r in 0..rows {
            residuals[r + long] = response[r] - fitted[r];
        }
        Ok(residuals)
    }
}

impl SeriesBackend for Sarimax {
    fn name(&self) -> &'static str {
        "SARIMAX"
    }

    fn fit(&mut self, endog: &Array2<f64>, exog: Option<&Array2<f64>>) -> Result<()> {
        if endog.ncols() != 1 {
            return Err(SolverError::invalid(format!(
                "SARIMAX models a single series, got {}",
                endog.ncols()
            )));
        }
        if let Some(x) = exog {
            if x.nrows() != endog.nrows() {
                return Err(SolverError::ShapeError {
                    expected: format!("{} exogenous rows", endog.nrows()),
                    actual: format!("{} exogenous rows", x.nrows()),
                });
            }
        }
        let ArimaOrder { p, d, q } = self.order;

        let level = endog.column(0).to_owned();
        let mut endog_differencer = Differencer::new(d);
        let w = endog_differencer.transform(&level)?.to_vec();
        let m = w.len();

        let mut exog_differencers = Vec::new();
        let diffed_exog = match exog {
            Some(x) => {
                let mut out = Array2::zeros((m, x.ncols()));
                for (j, column) in x.axis_iter(Axis(1)).enumerate() {
                    let mut differencer = Differencer::new(d);
                    out.column_mut(j).assign(&differencer.transform(&column.to_owned())?);
                    exog_differencers.push(differencer);
                }
                Some(out)
            }
            None => None,
        };
        let n_exog = diffed_exog.as_ref().map_or(0, |x| x.ncols());
        let n_params = self.trend.terms() + n_exog + p + q;

        let long = if q > 0 {
            ((m as f64).ln().floor() as usize).max(p + q).max(1)
        } else {
            0
        };
        let start = if q > 0 { (long + q).max(p) } else { p };
        if m <= start + n_params || (q > 0 && m <= 2 * long + 1) {
            return Err(SolverError::DataError(format!(
                "ARIMA({}, {}, {}) needs more observations than {}",
                p, d, q, level.len()
            )));
        }

        let innovations = if q > 0 {
            Self::long_ar_residuals(&w, long)?
        } else {
            vec![0.0; m]
        };

        let rows = m - start;
        let mut design = Array2::zeros((rows, n_params));
        for r in 0..rows {
            let t = r + start;
            let mut c = 0;
            if self.trend == Trend::Constant {
                design[[r, 0]] = 1.0;
                c = 1;
            }
            if let Some(x) = &diffed_exog {
                for j in 0..n_exog {
                    design[[r, c + j]] = x[[t, j]];
                }
                c += n_exog;
            }
            for i in 1..=p {
                design[[r, c + i - 1]] = w[t - i];
            }
            c += p;
            for j in 1..=q {
                design[[r, c + j - 1]] = innovations[t - j];
            }
        }
        let response = Array1::from_iter(w[start..].iter().copied());
        let beta = least_squares(&design, &response, 0.0)?;

        let offset = self.trend.terms();
        let mut fit = ArimaFit {
            intercept: if offset == 1 { beta[0] } else { 0.0 },
            exog: beta.slice(ndarray::s![offset..offset + n_exog]).to_vec(),
            ar: beta.slice(ndarray::s![offset + n_exog..offset + n_exog + p]).to_vec(),
            ma: beta.slice(ndarray::s![offset + n_exog + p..]).to_vec(),
            start,
            level: level.to_vec(),
            diffed: w,
            diffed_exog,
            residuals: Vec::new(),
            endog_differencer,
            exog_differencers,
        };

        let mut residuals = vec![0.0; m];
        for t in start..m {
            let x = fit.diffed_exog.as_ref().map(|x| x.row(t).to_vec());
            residuals[t] = fit.diffed[t] - fit.one_step(&fit.diffed, &residuals, t, x);
        }
        fit.residuals = residuals;
        self.fit = Some(fit);
        Ok(())
    }

    fn forecast(&self, steps: usize, exog: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        let fit = self.fitted()?;
        let future_exog = match (&fit.diffed_exog, exog) {
            (None, _) => None,
            (Some(_), Some(x)) if x.nrows() >= steps && x.ncols() == fit.exog_differencers.len() => {
                let mut out = Array2::zeros((steps, x.ncols()));
                for (j, differencer) in fit.exog_differencers.iter().enumerate() {
                    let column = x.column(j).slice(ndarray::s![..steps]).to_owned();
                    out.column_mut(j).assign(&differencer.continue_transform(&column)?);
                }
                Some(out)
            }
            (Some(_), _) => {
                return Err(SolverError::invalid(format!(
                    "forecasting {} steps requires {} rows of exogenous data",
                    steps, steps
                )))
            }
        };

        let m = fit.diffed.len();
        let mut w = fit.diffed.clone();
        let mut e = fit.residuals.clone();
        for h in 0..steps {
            let x = future_exog.as_ref().map(|x| x.row(h).to_vec());
            let next = fit.one_step(&w, &e, m + h, x);
            w.push(next);
            e.push(0.0);
        }
        let ahead = Array1::from_iter(w[m..].iter().copied());
        let level = fit.endog_differencer.integrate(&ahead)?;
        Ok(level.insert_axis(Axis(1)))
    }

    fn fitted_values(&self) -> Result<Array2<f64>> {
        let fit = self.fitted()?;
        let d = self.order.d;
        let mut out = Array2::from_elem((fit.level.len(), 1), f64::NAN);
        for t in fit.start..fit.diffed.len() {
            out[[t + d, 0]] = fit.level[t + d] - fit.residuals[t];
        }
        Ok(out)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "order".into(),
            json!([self.order.p, self.order.d, self.order.q]),
        );
        params.insert("seasonal_order".into(), json!([0, 0, 0, 0]));
        params.insert("trend".into(), json!(self.trend.as_str()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(t: usize) -> f64 {
        ((t * 7919) % 101) as f64 / 101.0 - 0.5
    }

    #[test]
    fn test_integrated_drift_continues_line() {
        let y = Array2::from_shape_fn((20, 1), |(t, _)| 3.0 + 2.0 * t as f64);
        let mut model = Sarimax::new(0, 1, 0, Trend::Constant);
        model.fit(&y, None).unwrap();
        let forecast = model.forecast(2, None).unwrap();
        assert!((forecast[[0, 0]] - 43.0).abs() < 1e-8);
        assert!((forecast[[1, 0]] - 45.0).abs() < 1e-8);
    }

    #[test]
    fn test_arma_fit_shapes() {
        let n = 120;
        let mut w = vec![0.0; n];
        for t in 1..n {
            w[t] = 0.5 * w[t - 1] + noise(t) + 0.3 * noise(t - 1);
        }
        let y = Array2::from_shape_fn((n, 1), |(t, _)| w[..=t].iter().sum::<f64>());
        let mut model = Sarimax::new(1, 1, 1, Trend::None);
        model.fit(&y, None).unwrap();

        let fitted = model.fitted_values().unwrap();
        assert_eq!(fitted.dim(), (n, 1));
        assert!(fitted[[0, 0]].is_nan());
        assert!(fitted[[n - 1, 0]].is_finite());
        let forecast = model.forecast(5, None).unwrap();
        assert_eq!(forecast.dim(), (5, 1));
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_params() {
        let seasonal = json!({"order": [1, 1, 1], "seasonal_order": [1, 0, 0, 12]});
        assert!(matches!(
            Sarimax::from_params(seasonal.as_object().unwrap()),
            Err(SolverError::UnsupportedCapability { .. })
        ));
        let bad = json!({"order": [1, 1]});
        assert!(Sarimax::from_params(bad.as_object().unwrap()).is_err());
        let ok = json!({"order": [2, 1, 0], "seasonal_order": [0, 0, 0, 0]});
        let model = Sarimax::from_params(ok.as_object().unwrap()).unwrap();
        assert_eq!(model.get_params()["order"], json!([2, 1, 0]));
    }

    #[test]
    fn test_multiple_series_rejected() {
        let mut model = Sarimax::new(1, 0, 0, Trend::None);
        assert!(model.fit(&Array2::zeros((30, 2)), None).is_err());
    }
}
