//! Naive forecasting baselines

use super::params::str_param;
use super::TabularBackend;
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BaselineMethod {
    /// Weighted mean of the history
    Mean,
    /// Last observation
    Naive,
    /// Last observation plus the average step of the history
    Drift,
}

impl BaselineMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "MEAN" => Ok(Self::Mean),
            "NAIVE" => Ok(Self::Naive),
            "DRIFT" => Ok(Self::Drift),
            other => Err(SolverError::invalid(format!(
                "baseline method must be one of MEAN, NAIVE, DRIFT; got {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "MEAN",
            Self::Naive => "NAIVE",
            Self::Drift => "DRIFT",
        }
    }
}

/// Ignores predictors: the k-th predicted row is `value + k * slope`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRegressor {
    pub method: BaselineMethod,
    value: Option<f64>,
    slope: f64,
    length: usize,
}

impl BaselineRegressor {
    pub fn new(method: BaselineMethod) -> Self {
        Self {
            method,
            value: None,
            slope: 0.0,
            length: 0,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let method = str_param(params, "method", "")?;
        if method.is_empty() {
            return Err(SolverError::invalid("baseline regressor requires a method"));
        }
        Ok(Self::new(BaselineMethod::parse(&method)?))
    }
}

impl TabularBackend for BaselineRegressor {
    fn name(&self) -> &'static str {
        "BaselineRegressor"
    }

    fn fit(&mut self, _x: &Array2<f64>, y: &Array1<f64>, sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let observed: Vec<(usize, f64)> = y
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (i, v))
            .collect();
        let (Some(&(_, first)), Some(&(_, last))) = (observed.first(), observed.last()) else {
            return Err(SolverError::DataError("baseline needs at least one observation".to_string()));
        };
        self.length = y.len();
        self.slope = 0.0;

        self.value = Some(match self.method {
            BaselineMethod::Mean => {
                let (mut num, mut den) = (0.0, 0.0);
                for &(i, v) in &observed {
                    let w = sample_weight.map_or(1.0, |w| w[i]);
                    num += w * v;
                    den += w;
                }
                if den > 0.0 {
                    num / den
                } else {
                    observed.iter().map(|(_, v)| v).sum::<f64>() / observed.len() as f64
                }
            }
            BaselineMethod::Naive => last,
            BaselineMethod::Drift => {
                self.slope = (last - first) / self.length as f64;
                last
            }
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let value = self.value.ok_or(SolverError::ModelNotFitted)?;
        Ok(Array1::from_iter(
            (0..x.nrows()).map(|k| value + (k + 1) as f64 * self.slope),
        ))
    }

    fn fitted_values(&self) -> Result<Array1<f64>> {
        let value = self.value.ok_or(SolverError::ModelNotFitted)?;
        let n = self.length as f64;
        Ok(Array1::from_iter(
            (0..self.length).map(|i| value + (i as f64 + 1.0 - n) * self.slope),
        ))
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("method".into(), json!(self.method.as_str()));
        params
    }
}
