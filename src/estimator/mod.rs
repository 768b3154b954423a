//! Estimators: one uniform fit/predict/refit/persist contract over the
//! tabular, time-series and cross-sectional model families.

pub mod cross_sectional;
pub mod registry;
pub mod tabular;
pub mod time_series;

pub use cross_sectional::CrossSectionalEstimator;
pub use registry::{registration, Capabilities, Library, StrategyRegistration};
pub use tabular::TabularEstimator;
pub use time_series::TimeSeriesEstimator;

use crate::error::{Result, SolverError};
use crate::preprocessing::frequency::{linear_cadence, min_frequency};
use crate::preprocessing::{DateOffset, ProblemData};
use crate::specification::{PipelineSpecification, TrainSpecification};
use crate::utils::frame::{
    column_datetime_ms, column_i64, datetime_column, f64_column, is_integral, is_temporal,
};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// File holding a single-backend estimator's fitted state
pub const ESTIMATOR_FILE: &str = "estimator.json";

/// A fitted (or fittable) model of one library family
#[derive(Debug, Clone)]
pub enum Estimator {
    Tabular(TabularEstimator),
    TimeSeries(TimeSeriesEstimator),
    CrossSectional(CrossSectionalEstimator),
}

impl Estimator {
    /// Construct the variant named by the pipeline's `library`
    pub fn new(pipeline: &PipelineSpecification, train: &TrainSpecification) -> Result<Self> {
        let estimator = match Library::from_name(&pipeline.model.library)? {
            Library::Tabular => {
                Estimator::Tabular(TabularEstimator::new(pipeline.clone(), train.problem.clone())?)
            }
            Library::TimeSeries => Estimator::TimeSeries(TimeSeriesEstimator::new(
                pipeline.clone(),
                train.problem.clone(),
            )?),
            Library::CrossSectional => {
                Estimator::CrossSectional(CrossSectionalEstimator::new(pipeline, train)?)
            }
        };
        Ok(estimator)
    }

    pub fn library(&self) -> Library {
        match self {
            Estimator::Tabular(_) => Library::Tabular,
            Estimator::TimeSeries(_) => Library::TimeSeries,
            Estimator::CrossSectional(_) => Library::CrossSectional,
        }
    }

    /// Data specification of the last fit, if one was given
    pub fn data_specification(&self) -> Option<&Value> {
        match self {
            Estimator::Tabular(e) => e.data_specification.as_ref(),
            Estimator::TimeSeries(e) => e.data_specification.as_ref(),
            Estimator::CrossSectional(e) => e.data_specification.as_ref(),
        }
    }

    /// Build the backend from the filtered hyperparameters and fit it
    pub fn fit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        match self {
            Estimator::Tabular(e) => e.fit(data, data_specification),
            Estimator::TimeSeries(e) => e.fit(data, data_specification),
            Estimator::CrossSectional(e) => e.fit(data, data_specification),
        }
    }

    /// Re-estimate on new data; a no-op when `data_specification` equals
    /// the one recorded by the last fit.
    pub fn refit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        if is_same_specification(self.data_specification(), data_specification.as_ref()) {
            return Ok(());
        }
        match self {
            Estimator::Tabular(e) => e.fit(data, data_specification),
            Estimator::TimeSeries(e) => e.fit(data, data_specification),
            Estimator::CrossSectional(e) => e.refit(data, data_specification),
        }
    }

    pub fn predict(&self, data: &ProblemData) -> Result<DataFrame> {
        match self {
            Estimator::Tabular(e) => e.predict(data),
            Estimator::TimeSeries(e) => e.predict(data),
            Estimator::CrossSectional(e) => e.predict(data),
        }
    }

    pub fn predict_proba(&self, data: &ProblemData) -> Result<DataFrame> {
        match self {
            Estimator::Tabular(e) => e.predict_proba(data),
            Estimator::TimeSeries(e) => Err(SolverError::unsupported(e.strategy(), "predict_proba")),
            Estimator::CrossSectional(e) => e.predict_proba(data),
        }
    }

    pub fn fitted_values(&self) -> Result<DataFrame> {
        match self {
            Estimator::Tabular(e) => e.fitted_values(),
            Estimator::TimeSeries(e) => e.fitted_values(),
            Estimator::CrossSectional(e) => e.fitted_values(),
        }
    }

    /// Effective hyperparameters of the backend
    pub fn describe(&self) -> Result<Value> {
        match self {
            Estimator::Tabular(e) => e.describe(),
            Estimator::TimeSeries(e) => e.describe(),
            Estimator::CrossSectional(_) => Err(SolverError::unsupported(
                Library::CrossSectional.as_str(),
                "describe",
            )),
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        match self {
            Estimator::Tabular(e) => write_json(&dir.join(ESTIMATOR_FILE), e),
            Estimator::TimeSeries(e) => write_json(&dir.join(ESTIMATOR_FILE), e),
            Estimator::CrossSectional(e) => e.save(dir),
        }
    }

    pub fn load(
        dir: &Path,
        library: Library,
        pipeline: &PipelineSpecification,
        train: &TrainSpecification,
    ) -> Result<Self> {
        Ok(match library {
            Library::Tabular => Estimator::Tabular(read_json(&dir.join(ESTIMATOR_FILE))?),
            Library::TimeSeries => Estimator::TimeSeries(read_json(&dir.join(ESTIMATOR_FILE))?),
            Library::CrossSectional => {
                Estimator::CrossSectional(CrossSectionalEstimator::load(dir, pipeline, train)?)
            }
        })
    }
}

fn is_same_specification(previous: Option<&Value>, next: Option<&Value>) -> bool {
    matches!((previous, next), (Some(a), Some(b)) if a == b)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// `{"model": name, "all_parameters": {...}}` without null parameters
pub(crate) fn describe_params(name: &str, params: Map<String, Value>) -> Value {
    let all_parameters: Map<String, Value> = params
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .collect();
    serde_json::json!({
        "model": name,
        "all_parameters": all_parameters,
    })
}

/// Where a requested instant falls relative to the fitted sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    InSample(usize),
    /// `k` periods past the last fitted instant, `k >= 1`
    Ahead(usize),
    Unknown,
}

/// Furthest a forecast may be requested past the fitted sample
const MAX_HORIZON: usize = 100_000;

/// Instants of a fitted series and the cadence it continues at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ForecastIndex {
    pub instants: Vec<i64>,
    pub cadence: Option<DateOffset>,
    /// Whether the ordering column held datetimes (else integers)
    pub temporal: bool,
}

impl ForecastIndex {
    pub fn new(instants: Vec<i64>, temporal: bool) -> Self {
        let cadence = min_frequency(&instants).or_else(|| linear_cadence(&instants));
        Self {
            instants,
            cadence,
            temporal,
        }
    }

    pub fn locate(&self, instant: Option<i64>) -> Result<Position> {
        let Some(t) = instant else {
            return Ok(Position::Unknown);
        };
        if let Ok(i) = self.instants.binary_search(&t) {
            return Ok(Position::InSample(i));
        }
        let (Some(&last), Some(cadence)) = (self.instants.last(), self.cadence) else {
            return Ok(Position::Unknown);
        };
        if t < last || cadence.approx_seconds() <= 0.0 {
            return Ok(Position::Unknown);
        }
        for k in 1..=MAX_HORIZON {
            if cadence.apply(last, k as i64)? >= t {
                return Ok(Position::Ahead(k));
            }
        }
        Err(SolverError::invalid(format!(
            "forecast horizon exceeds {} periods",
            MAX_HORIZON
        )))
    }

    pub fn locate_all(&self, instants: &[Option<i64>]) -> Result<Vec<Position>> {
        instants.iter().map(|&t| self.locate(t)).collect()
    }

    /// Number of periods a forecast must cover to reach every position
    pub fn horizon(positions: &[Position]) -> usize {
        positions
            .iter()
            .filter_map(|p| match p {
                Position::Ahead(k) => Some(*k),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Ordering column holding `instants`
    pub fn column(&self, name: &str, instants: Vec<Option<i64>>) -> Result<Column> {
        if self.temporal {
            datetime_column(name, instants)
        } else {
            Ok(Column::new(name.into(), instants))
        }
    }
}

/// Ordering instants of a frame: datetimes as epoch milliseconds, integers as-is
pub(crate) fn ordering_instants(df: &DataFrame, ordering: &str) -> Result<(Vec<Option<i64>>, bool)> {
    let dtype = df
        .column(ordering)
        .map_err(|_| SolverError::FeatureNotFound(ordering.to_string()))?
        .dtype()
        .clone();
    if is_temporal(&dtype) {
        Ok((column_datetime_ms(df, ordering)?, true))
    } else if is_integral(&dtype) {
        Ok((column_i64(df, ordering)?, false))
    } else {
        Err(SolverError::DataError(format!(
            "ordering column {} must hold datetimes or integers, found {}",
            ordering, dtype
        )))
    }
}

/// Pick per-row values: fitted values in-sample, forecasts ahead, null otherwise
pub(crate) fn align_to_positions(
    positions: &[Position],
    fitted: &Array2<f64>,
    forecast: &Array2<f64>,
    target: usize,
) -> Vec<Option<f64>> {
    positions
        .iter()
        .map(|p| {
            let value = match *p {
                Position::InSample(i) => fitted.get((i, target)).copied(),
                Position::Ahead(k) => forecast.get((k - 1, target)).copied(),
                Position::Unknown => None,
            };
            value.filter(|v| v.is_finite())
        })
        .collect()
}

/// Frame of the ordering column followed by one float column per target
pub(crate) fn series_frame(
    index: &ForecastIndex,
    ordering: &str,
    instants: Vec<Option<i64>>,
    targets: &[String],
    values: Vec<Vec<Option<f64>>>,
) -> Result<DataFrame> {
    let mut columns = vec![index.column(ordering, instants)?];
    for (name, column) in targets.iter().zip(values) {
        columns.push(f64_column(name, column));
    }
    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::date_offset::MILLIS_PER_DAY;

    fn daily_index() -> ForecastIndex {
        ForecastIndex::new((0..10).map(|d| d * MILLIS_PER_DAY).collect(), true)
    }

    #[test]
    fn test_locate_positions() {
        let index = daily_index();
        assert_eq!(index.cadence, Some(DateOffset::days(1)));
        assert_eq!(index.locate(Some(3 * MILLIS_PER_DAY)).unwrap(), Position::InSample(3));
        assert_eq!(index.locate(Some(11 * MILLIS_PER_DAY)).unwrap(), Position::Ahead(2));
        assert_eq!(index.locate(Some(MILLIS_PER_DAY / 2)).unwrap(), Position::Unknown);
        assert_eq!(index.locate(None).unwrap(), Position::Unknown);
    }

    #[test]
    fn test_alignment() {
        let positions = vec![Position::InSample(0), Position::Ahead(1), Position::Unknown];
        let fitted = Array2::from_elem((1, 1), f64::NAN);
        let forecast = Array2::from_elem((1, 1), 5.0);
        let aligned = align_to_positions(&positions, &fitted, &forecast, 0);
        assert_eq!(aligned, vec![None, Some(5.0), None]);
        assert_eq!(ForecastIndex::horizon(&positions), 1);
    }

    #[test]
    fn test_refit_memo() {
        let spec = serde_json::json!({"rows": 10});
        assert!(is_same_specification(Some(&spec), Some(&spec.clone())));
        assert!(!is_same_specification(None, Some(&spec)));
        assert!(!is_same_specification(Some(&spec), None));
    }
}
