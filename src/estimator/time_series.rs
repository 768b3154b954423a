//! Estimator over the time-series model family (AR, VAR, SARIMAX)

use super::registry::{registration, Library, StrategyRegistration};
use super::{
    align_to_positions, describe_params, ordering_instants, series_frame, ForecastIndex, Position,
};
use crate::error::{Result, SolverError};
use crate::models::{SeriesBackend, SeriesModel};
use crate::preprocessing::ProblemData;
use crate::specification::{PipelineSpecification, ProblemSpecification};
use crate::utils::frame::{column_f64, has_column};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// One series model over every target of a forecasting problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesEstimator {
    pipeline: PipelineSpecification,
    problem: ProblemSpecification,
    strategy: String,
    params: Map<String, Value>,
    template: SeriesModel,
    model: Option<SeriesModel>,
    ordering: String,
    targets: Vec<String>,
    exogenous: Vec<String>,
    index: Option<ForecastIndex>,
    pub(crate) data_specification: Option<Value>,
}

/// Values of `names` on `rows`, or `None` for rows missing any of them
fn gather(df: &DataFrame, names: &[String], rows: &[usize]) -> Result<Vec<Option<Vec<f64>>>> {
    let columns = names
        .iter()
        .map(|n| column_f64(df, n))
        .collect::<Result<Vec<_>>>()?;
    Ok(rows
        .iter()
        .map(|&i| {
            columns
                .iter()
                .map(|c| c.get(i).copied().flatten().filter(|v| v.is_finite()))
                .collect::<Option<Vec<f64>>>()
        })
        .collect())
}

fn to_matrix(rows: &[Vec<f64>], width: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), width));
    for (i, row) in rows.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            out[[i, j]] = *v;
        }
    }
    out
}

impl TimeSeriesEstimator {
    pub fn new(pipeline: PipelineSpecification, problem: ProblemSpecification) -> Result<Self> {
        let strategy = pipeline.model.strategy_name()?.to_string();
        let reg = registration(Library::TimeSeries, &strategy)?;
        if !problem.is_forecasting() {
            return Err(SolverError::unsupported(reg.strategy, "non-forecasting problems"));
        }
        let ordering = problem
            .ordering()?
            .ok_or_else(|| SolverError::invalid("forecasting problem has no ordering column"))?;
        let params = reg.filter_params(&pipeline.model.hyperparameters);
        let template = SeriesModel::build(&strategy, &params)?;
        Ok(Self {
            pipeline,
            problem,
            strategy,
            params,
            template,
            model: None,
            ordering,
            targets: Vec::new(),
            exogenous: Vec::new(),
            index: None,
            data_specification: None,
        })
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn pipeline(&self) -> &PipelineSpecification {
        &self.pipeline
    }

    fn registration(&self) -> Result<&'static StrategyRegistration> {
        registration(Library::TimeSeries, &self.strategy)
    }

    pub fn fit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        let y = data
            .y
            .as_ref()
            .ok_or_else(|| SolverError::DataError("forecasting data holds no targets".to_string()))?;
        let (instants, temporal) = ordering_instants(y, &self.ordering)?;
        let targets: Vec<String> = self
            .problem
            .targets()
            .into_iter()
            .filter(|t| has_column(y, t))
            .collect();
        if targets.is_empty() {
            return Err(SolverError::DataError("no target column present".to_string()));
        }

        let exog_frame = data.x.as_ref().filter(|x| {
            self.problem.exogenous().iter().any(|e| has_column(x, e))
        });
        let exogenous: Vec<String> = match exog_frame {
            Some(x) => {
                let reg = self.registration()?;
                reg.require(reg.capabilities.exogenous, "exogenous")?;
                if x.height() != y.height() {
                    return Err(SolverError::ShapeError {
                        expected: format!("{} rows", y.height()),
                        actual: format!("{} rows", x.height()),
                    });
                }
                self.problem
                    .exogenous()
                    .into_iter()
                    .filter(|e| has_column(x, e))
                    .collect()
            }
            None => Vec::new(),
        };

        let mut order: Vec<usize> = (0..y.height()).filter(|&i| instants[i].is_some()).collect();
        order.sort_by_key(|&i| instants[i]);
        let endog_rows = gather(y, &targets, &order)?;
        let exog_rows = match exog_frame {
            Some(x) => gather(x, &exogenous, &order)?,
            None => vec![Some(Vec::new()); order.len()],
        };

        let mut kept_instants = Vec::with_capacity(order.len());
        let mut endog = Vec::with_capacity(order.len());
        let mut exog = Vec::with_capacity(order.len());
        for ((&row, e), x) in order.iter().zip(endog_rows).zip(exog_rows) {
            if let (Some(e), Some(x), Some(t)) = (e, x, instants[row]) {
                kept_instants.push(t);
                endog.push(e);
                exog.push(x);
            }
        }
        if kept_instants.len() < order.len() {
            debug!(dropped = order.len() - kept_instants.len(), "dropping incomplete rows");
        }
        if endog.is_empty() {
            return Err(SolverError::DataError("no complete rows to fit".to_string()));
        }

        let endog = to_matrix(&endog, targets.len());
        let exog = (!exogenous.is_empty()).then(|| to_matrix(&exog, exogenous.len()));
        let mut model = self.template.clone();
        model.fit(&endog, exog.as_ref())?;

        info!(
            strategy = %self.strategy,
            observations = endog.nrows(),
            targets = targets.len(),
            exogenous = exogenous.len(),
            "fitted time-series estimator"
        );
        self.index = Some(ForecastIndex::new(kept_instants, temporal));
        self.model = Some(model);
        self.targets = targets;
        self.exogenous = exogenous;
        self.data_specification = data_specification;
        Ok(())
    }

    fn fitted(&self) -> Result<(&SeriesModel, &ForecastIndex)> {
        match (&self.model, &self.index) {
            (Some(model), Some(index)) => Ok((model, index)),
            _ => Err(SolverError::ModelNotFitted),
        }
    }

    /// Exogenous rows for forecast steps `1..=horizon`, taken from the rows
    /// of `x` that fall ahead of the fitted sample.
    fn future_exog(&self, index: &ForecastIndex, data: &ProblemData, horizon: usize) -> Result<Option<Array2<f64>>> {
        if self.exogenous.is_empty() || horizon == 0 {
            return Ok(None);
        }
        let x = data
            .x
            .as_ref()
            .ok_or_else(|| SolverError::invalid("forecasting needs future exogenous values"))?;
        let (instants, _) = ordering_instants(x, &self.ordering)?;
        let positions = index.locate_all(&instants)?;
        let all_rows: Vec<usize> = (0..x.height()).collect();
        let values = gather(x, &self.exogenous, &all_rows)?;

        let mut steps: Vec<Option<Vec<f64>>> = vec![None; horizon];
        for (position, row) in positions.iter().zip(values) {
            if let (Position::Ahead(k), Some(row)) = (position, row) {
                if *k <= horizon {
                    steps[k - 1] = Some(row);
                }
            }
        }
        let rows = steps
            .into_iter()
            .enumerate()
            .map(|(k, row)| {
                row.ok_or_else(|| {
                    SolverError::invalid(format!("exogenous values missing for forecast step {}", k + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(to_matrix(&rows, self.exogenous.len())))
    }

    pub fn predict(&self, data: &ProblemData) -> Result<DataFrame> {
        let (model, index) = self.fitted()?;
        let frame = [data.y.as_ref(), data.x.as_ref(), data.frame.as_ref()]
            .into_iter()
            .flatten()
            .find(|f| has_column(f, &self.ordering))
            .ok_or_else(|| SolverError::FeatureNotFound(self.ordering.clone()))?;
        let (instants, _) = ordering_instants(frame, &self.ordering)?;
        let positions = index.locate_all(&instants)?;
        let horizon = ForecastIndex::horizon(&positions);

        let forecast = if horizon > 0 {
            let exog = self.future_exog(index, data, horizon)?;
            model.forecast(horizon, exog.as_ref())?
        } else {
            Array2::zeros((0, self.targets.len()))
        };
        let fitted = model.fitted_values()?;
        let values = (0..self.targets.len())
            .map(|j| align_to_positions(&positions, &fitted, &forecast, j))
            .collect();
        series_frame(index, &self.ordering, instants, &self.targets, values)
    }

    pub fn fitted_values(&self) -> Result<DataFrame> {
        let (model, index) = self.fitted()?;
        let fitted = model.fitted_values()?;
        let values = (0..self.targets.len())
            .map(|j| {
                fitted
                    .column(j)
                    .iter()
                    .map(|&v| v.is_finite().then_some(v))
                    .collect()
            })
            .collect();
        let instants = index.instants.iter().map(|&t| Some(t)).collect();
        series_frame(index, &self.ordering, instants, &self.targets, values)
    }

    pub fn describe(&self) -> Result<Value> {
        let model = self.model.as_ref().unwrap_or(&self.template);
        Ok(describe_params(model.name(), model.get_params()))
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::ModelSpecification;
    use crate::utils::frame::column_names;
    use serde_json::json;

    fn problem(exogenous: &[&str]) -> ProblemSpecification {
        ProblemSpecification::builder()
            .targets(["y"])
            .exogenous(exogenous.iter().copied())
            .forecasting(true)
            .ordering("t")
            .build()
    }

    fn series(n: i64) -> DataFrame {
        let mut level = 0.0;
        let y: Vec<f64> = (0..n)
            .map(|t| {
                level = 0.6 * level + 1.0 + if t % 2 == 0 { 0.3 } else { -0.3 };
                level
            })
            .collect();
        df!("t" => (0..n).collect::<Vec<i64>>(), "y" => y).unwrap()
    }

    fn pipeline(strategy: &str) -> PipelineSpecification {
        PipelineSpecification::new(ModelSpecification::new("time-series", strategy))
    }

    #[test]
    fn test_ar_forecasts_past_sample() {
        let spec = PipelineSpecification::new(
            ModelSpecification::new("time-series", "AR").with_param("lags", json!([1, 2])),
        );
        let mut estimator = TimeSeriesEstimator::new(spec, problem(&[])).unwrap();
        estimator.fit(&ProblemData::from_y(series(40)), None).unwrap();

        let test = df!("t" => &[38i64, 39, 40, 41, 42]).unwrap();
        let out = estimator.predict(&ProblemData::from_y(test)).unwrap();
        assert_eq!(column_names(&out), vec!["t", "y"]);
        let y = column_f64(&out, "y").unwrap();
        assert!(y.iter().all(|v| v.is_some()));
        assert_eq!(estimator.describe().unwrap()["model"], json!("AutoReg"));
    }

    #[test]
    fn test_requires_forecasting_problem() {
        let tabular = ProblemSpecification::builder().targets(["y"]).build();
        assert!(matches!(
            TimeSeriesEstimator::new(pipeline("AR"), tabular),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_var_rejects_exogenous() {
        let mut estimator = TimeSeriesEstimator::new(pipeline("VAR"), problem(&["z"])).unwrap();
        let data = ProblemData {
            y: Some(series(30)),
            x: Some(df!("t" => (0..30i64).collect::<Vec<_>>(), "z" => vec![1.0; 30]).unwrap()),
            ..ProblemData::default()
        };
        assert!(matches!(
            estimator.fit(&data, None),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_sarimax_needs_future_exogenous() {
        let spec = PipelineSpecification::new(
            ModelSpecification::new("time-series", "SARIMAX").with_param("order", json!([1, 0, 0])),
        );
        let mut estimator = TimeSeriesEstimator::new(spec, problem(&["z"])).unwrap();
        let z: Vec<f64> = (0..40).map(|t| (t % 3) as f64).collect();
        let data = ProblemData {
            y: Some(series(40)),
            x: Some(df!("t" => (0..40i64).collect::<Vec<_>>(), "z" => z).unwrap()),
            ..ProblemData::default()
        };
        estimator.fit(&data, None).unwrap();

        let ahead = ProblemData::from_y(df!("t" => &[41i64]).unwrap());
        assert!(matches!(
            estimator.predict(&ahead),
            Err(SolverError::InvalidSpecification(_))
        ));

        let with_exog = ProblemData {
            y: Some(df!("t" => &[40i64, 41]).unwrap()),
            x: Some(df!("t" => &[40i64, 41], "z" => &[1.0, 2.0]).unwrap()),
            ..ProblemData::default()
        };
        let out = estimator.predict(&with_exog).unwrap();
        assert_eq!(out.height(), 2);
    }
}
