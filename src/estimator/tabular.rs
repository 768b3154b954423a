//! Estimator over the tabular model family

use super::registry::{registration, Capabilities, Library, StrategyRegistration};
use super::{align_to_positions, describe_params, ordering_instants, series_frame, ForecastIndex};
use crate::error::{Result, SolverError};
use crate::models::{TabularBackend, TabularModel};
use crate::preprocessing::ProblemData;
use crate::specification::{PipelineSpecification, ProblemSpecification};
use crate::utils::frame::{
    column_f64, column_names, column_str, columns_to_array2, f64_column, has_column, is_numeric,
    str_column,
};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Class labels of one target, sorted; backends see their positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
enum Labels {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl Labels {
    /// Labels observed in `name` and the code of every row (null when missing)
    fn fit(df: &DataFrame, name: &str) -> Result<(Self, Vec<Option<f64>>)> {
        if is_numeric(df.column(name)?.dtype()) {
            let values = column_f64(df, name)?;
            let mut classes: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
            classes.sort_by(f64::total_cmp);
            classes.dedup();
            let codes = values
                .iter()
                .map(|v| {
                    v.and_then(|v| classes.binary_search_by(|c| c.total_cmp(&v)).ok())
                        .map(|i| i as f64)
                })
                .collect();
            Ok((Labels::Numeric(classes), codes))
        } else {
            let values = column_str(df, name)?;
            let classes: Vec<String> = values
                .iter()
                .flatten()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let codes = values
                .iter()
                .map(|v| {
                    v.as_ref()
                        .and_then(|v| classes.binary_search(v).ok())
                        .map(|i| i as f64)
                })
                .collect();
            Ok((Labels::Text(classes), codes))
        }
    }

    fn len(&self) -> usize {
        match self {
            Labels::Numeric(c) => c.len(),
            Labels::Text(c) => c.len(),
        }
    }

    fn names(&self) -> Vec<String> {
        match self {
            Labels::Numeric(c) => c
                .iter()
                .map(|v| {
                    if v.fract() == 0.0 {
                        format!("{}", *v as i64)
                    } else {
                        v.to_string()
                    }
                })
                .collect(),
            Labels::Text(c) => c.clone(),
        }
    }

    fn position(&self, code: f64) -> Option<usize> {
        if !code.is_finite() || self.len() == 0 {
            return None;
        }
        Some((code.round().max(0.0) as usize).min(self.len() - 1))
    }

    fn decode(&self, name: &str, codes: &Array1<f64>) -> Column {
        match self {
            Labels::Numeric(classes) => f64_column(
                name,
                codes.iter().map(|&c| self.position(c).map(|i| classes[i])).collect(),
            ),
            Labels::Text(classes) => str_column(
                name,
                codes
                    .iter()
                    .map(|&c| self.position(c).map(|i| classes[i].clone()))
                    .collect(),
            ),
        }
    }
}

/// Per-target tabular models.
///
/// On forecasting problems the models see only the time index: they are
/// trained on the ordered target series and asked for values by position
/// relative to the fitted sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularEstimator {
    pipeline: PipelineSpecification,
    problem: ProblemSpecification,
    strategy: String,
    params: Map<String, Value>,
    template: TabularModel,
    models: Vec<TabularModel>,
    targets: Vec<String>,
    features: Vec<String>,
    labels: Vec<Option<Labels>>,
    index: Option<ForecastIndex>,
    ordering: Option<String>,
    pub(crate) data_specification: Option<Value>,
}

fn sample_weight(capabilities: &Capabilities, data: &ProblemData, rows: &[usize]) -> Option<Array1<f64>> {
    if !capabilities.sample_weight {
        return None;
    }
    let weight = data.weight.as_ref()?;
    rows.iter().map(|&i| weight.get(i).copied()).collect::<Option<Array1<f64>>>()
}

impl TabularEstimator {
    pub fn new(pipeline: PipelineSpecification, problem: ProblemSpecification) -> Result<Self> {
        let strategy = pipeline.model.strategy_name()?.to_string();
        let reg = registration(Library::Tabular, &strategy)?;
        if problem.is_forecasting() {
            reg.require(reg.capabilities.forecasting, "forecasting")?;
        }
        let params = reg.filter_params(&pipeline.model.hyperparameters);
        let template = TabularModel::build(&strategy, &params)?;
        Ok(Self {
            pipeline,
            problem,
            strategy,
            params,
            template,
            models: Vec::new(),
            targets: Vec::new(),
            features: Vec::new(),
            labels: Vec::new(),
            index: None,
            ordering: None,
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
        registration(Library::Tabular, &self.strategy)
    }

    pub fn is_fitted(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn fit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        if self.problem.is_forecasting() {
            self.fit_series(data)?;
        } else {
            self.fit_tabular(data)?;
        }
        self.data_specification = data_specification;
        info!(
            strategy = %self.strategy,
            targets = self.targets.len(),
            features = self.features.len(),
            "fitted tabular estimator"
        );
        Ok(())
    }

    fn fit_series(&mut self, data: &ProblemData) -> Result<()> {
        let capabilities = self.registration()?.capabilities;
        let y = data
            .y
            .as_ref()
            .ok_or_else(|| SolverError::DataError("forecasting data holds no targets".to_string()))?;
        let ordering = self
            .problem
            .ordering()?
            .ok_or_else(|| SolverError::invalid("forecasting problem has no ordering column"))?;
        let (instants, temporal) = ordering_instants(y, &ordering)?;
        let targets: Vec<String> = self
            .problem
            .targets()
            .into_iter()
            .filter(|t| has_column(y, t))
            .collect();
        if targets.is_empty() {
            return Err(SolverError::DataError("no target column present".to_string()));
        }

        let mut rows: Vec<usize> = (0..y.height()).filter(|&i| instants[i].is_some()).collect();
        rows.sort_by_key(|&i| instants[i]);
        if rows.is_empty() {
            return Err(SolverError::DataError("no ordered rows to fit".to_string()));
        }
        let index = ForecastIndex::new(rows.iter().filter_map(|&i| instants[i]).collect(), temporal);
        let x = Array2::zeros((rows.len(), 0));
        let weight = sample_weight(&capabilities, data, &rows);

        let mut models = Vec::with_capacity(targets.len());
        for target in &targets {
            let values = column_f64(y, target)?;
            let series: Array1<f64> = rows.iter().map(|&i| values[i].unwrap_or(f64::NAN)).collect();
            let mut model = self.template.clone();
            model.fit(&x, &series, weight.as_ref())?;
            models.push(model);
        }

        self.labels = vec![None; targets.len()];
        self.targets = targets;
        self.features.clear();
        self.models = models;
        self.index = Some(index);
        self.ordering = Some(ordering);
        Ok(())
    }

    fn fit_tabular(&mut self, data: &ProblemData) -> Result<()> {
        let capabilities = self.registration()?.capabilities;
        let (Some(x_frame), Some(y_frame)) = (data.x.as_ref(), data.y.as_ref()) else {
            return Err(SolverError::DataError(
                "fitting needs both predictors and targets".to_string(),
            ));
        };
        if x_frame.height() != y_frame.height() {
            return Err(SolverError::ShapeError {
                expected: format!("{} rows", y_frame.height()),
                actual: format!("{} rows", x_frame.height()),
            });
        }
        let features = column_names(x_frame);
        let x = columns_to_array2(x_frame, &features)?;
        let targets: Vec<String> = self
            .problem
            .targets()
            .into_iter()
            .filter(|t| has_column(y_frame, t))
            .collect();
        if targets.is_empty() {
            return Err(SolverError::DataError("no target column present".to_string()));
        }

        let mut models = Vec::with_capacity(targets.len());
        let mut labels = Vec::with_capacity(targets.len());
        for target in &targets {
            let (target_labels, values) = if capabilities.classification {
                let (l, codes) = Labels::fit(y_frame, target)?;
                (Some(l), codes)
            } else {
                (None, column_f64(y_frame, target)?)
            };
            let rows: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.map_or(false, f64::is_finite))
                .map(|(i, _)| i)
                .collect();
            if rows.is_empty() {
                return Err(SolverError::DataError(format!(
                    "target {} has no observed values",
                    target
                )));
            }
            if rows.len() < values.len() {
                debug!(target = %target, skipped = values.len() - rows.len(), "skipping rows without target");
            }
            let xs = x.select(Axis(0), &rows);
            let ys: Array1<f64> = rows.iter().filter_map(|&i| values[i]).collect();
            let weight = sample_weight(&capabilities, data, &rows);

            let mut model = self.template.clone();
            model.fit(&xs, &ys, weight.as_ref())?;
            models.push(model);
            labels.push(target_labels);
        }

        self.targets = targets;
        self.features = features;
        self.models = models;
        self.labels = labels;
        self.index = None;
        self.ordering = None;
        Ok(())
    }

    pub fn predict(&self, data: &ProblemData) -> Result<DataFrame> {
        if !self.is_fitted() {
            return Err(SolverError::ModelNotFitted);
        }
        match (&self.index, &self.ordering) {
            (Some(index), Some(ordering)) => self.predict_series(index, ordering, data),
            _ => self.predict_tabular(data),
        }
    }

    fn series_fitted(&self) -> Result<Array2<f64>> {
        let n = self.index.as_ref().map_or(0, |i| i.instants.len());
        let mut fitted = Array2::from_elem((n, self.models.len()), f64::NAN);
        for (j, model) in self.models.iter().enumerate() {
            let values = model.fitted_values()?;
            for (i, v) in values.iter().take(n).enumerate() {
                fitted[[i, j]] = *v;
            }
        }
        Ok(fitted)
    }

    fn predict_series(&self, index: &ForecastIndex, ordering: &str, data: &ProblemData) -> Result<DataFrame> {
        let frame = [data.y.as_ref(), data.x.as_ref(), data.frame.as_ref()]
            .into_iter()
            .flatten()
            .find(|f| has_column(f, ordering))
            .ok_or_else(|| SolverError::FeatureNotFound(ordering.to_string()))?;
        let (instants, _) = ordering_instants(frame, ordering)?;
        let positions = index.locate_all(&instants)?;
        let horizon = ForecastIndex::horizon(&positions);

        let fitted = self.series_fitted()?;
        let mut forecast = Array2::zeros((horizon, self.models.len()));
        let future = Array2::zeros((horizon, 0));
        for (j, model) in self.models.iter().enumerate() {
            forecast.column_mut(j).assign(&model.predict(&future)?);
        }

        let values = (0..self.targets.len())
            .map(|j| align_to_positions(&positions, &fitted, &forecast, j))
            .collect();
        series_frame(index, ordering, instants, &self.targets, values)
    }

    fn design_matrix(&self, data: &ProblemData) -> Result<Array2<f64>> {
        let x_frame = data
            .x
            .as_ref()
            .ok_or_else(|| SolverError::DataError("prediction needs predictors".to_string()))?;
        if let Some(missing) = self.features.iter().find(|f| !has_column(x_frame, f)) {
            return Err(SolverError::FeatureNotFound(missing.clone()));
        }
        columns_to_array2(x_frame, &self.features)
    }

    fn index_columns(data: &ProblemData, height: usize) -> Vec<Column> {
        match &data.indexes {
            Some(indexes) if indexes.height() == height && indexes.width() > 0 => {
                indexes.get_columns().to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn predict_tabular(&self, data: &ProblemData) -> Result<DataFrame> {
        let x = self.design_matrix(data)?;
        let mut columns = Self::index_columns(data, x.nrows());
        for ((target, model), labels) in self.targets.iter().zip(&self.models).zip(&self.labels) {
            let predicted = model.predict(&x)?;
            columns.push(match labels {
                Some(labels) => labels.decode(target, &predicted),
                None => f64_column(target, predicted.iter().map(|&v| v.is_finite().then_some(v)).collect()),
            });
        }
        Ok(DataFrame::new(columns)?)
    }

    /// Class probabilities, or decision scores for strategies without them
    pub fn predict_proba(&self, data: &ProblemData) -> Result<DataFrame> {
        let reg = self.registration()?;
        reg.require(reg.capabilities.classification, "predict_proba")?;
        if !self.is_fitted() {
            return Err(SolverError::ModelNotFitted);
        }
        let x = self.design_matrix(data)?;
        let mut columns = Self::index_columns(data, x.nrows());
        for ((target, model), labels) in self.targets.iter().zip(&self.models).zip(&self.labels) {
            let scores = if reg.capabilities.predict_proba {
                model.predict_proba(&x)?
            } else if reg.capabilities.decision_function {
                model.decision_function(&x)?
            } else {
                return Err(SolverError::unsupported(&self.strategy, "predict_proba"));
            };
            let names = labels.as_ref().map(Labels::names).unwrap_or_default();
            for (k, name) in names.iter().enumerate().take(scores.ncols()) {
                let column_name = if self.targets.len() == 1 {
                    name.clone()
                } else {
                    format!("{}_{}", target, name)
                };
                columns.push(f64_column(
                    &column_name,
                    scores.column(k).iter().map(|&v| Some(v)).collect(),
                ));
            }
        }
        Ok(DataFrame::new(columns)?)
    }

    /// In-sample predictions of a forecasting fit, keyed by the ordering column
    pub fn fitted_values(&self) -> Result<DataFrame> {
        let reg = self.registration()?;
        reg.require(reg.capabilities.fitted_values, "fitted_values")?;
        let (Some(index), Some(ordering)) = (&self.index, &self.ordering) else {
            return Err(SolverError::ModelNotFitted);
        };
        let fitted = self.series_fitted()?;
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
        series_frame(index, ordering, instants, &self.targets, values)
    }

    pub fn describe(&self) -> Result<Value> {
        let model = self.models.first().unwrap_or(&self.template);
        Ok(describe_params(model.name(), model.get_params()))
    }

    /// Hyperparameters accepted by the strategy, as configured
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::ModelSpecification;
    use crate::utils::frame::datetime_column;
    use serde_json::json;

    fn pipeline(strategy: &str) -> PipelineSpecification {
        PipelineSpecification::new(ModelSpecification::new("tabular", strategy))
    }

    fn regression_problem() -> ProblemSpecification {
        ProblemSpecification::builder()
            .targets(["y"])
            .predictors(["a"])
            .build()
    }

    #[test]
    fn test_regression_predicts_with_indexes() {
        let mut estimator = TabularEstimator::new(pipeline("ORDINARY_LEAST_SQUARES"), regression_problem()).unwrap();
        let data = ProblemData {
            x: Some(df!("a" => &[0.0, 1.0, 2.0, 3.0]).unwrap()),
            y: Some(df!("y" => &[1.0, 3.0, 5.0, 7.0]).unwrap()),
            indexes: Some(df!("d3mIndex" => &[10i64, 11, 12, 13]).unwrap()),
            ..ProblemData::default()
        };
        estimator.fit(&data, None).unwrap();
        let out = estimator.predict(&data).unwrap();
        assert_eq!(column_names(&out), vec!["d3mIndex", "y"]);
        let y = column_f64(&out, "y").unwrap();
        assert!((y[3].unwrap() - 7.0).abs() < 1e-8);
    }

    #[test]
    fn test_missing_feature_at_predict() {
        let mut estimator = TabularEstimator::new(pipeline("ORDINARY_LEAST_SQUARES"), regression_problem()).unwrap();
        let data = ProblemData {
            x: Some(df!("a" => &[0.0, 1.0, 2.0]).unwrap()),
            y: Some(df!("y" => &[0.0, 1.0, 2.0]).unwrap()),
            ..ProblemData::default()
        };
        estimator.fit(&data, None).unwrap();
        let test = ProblemData {
            x: Some(df!("b" => &[0.0]).unwrap()),
            ..ProblemData::default()
        };
        assert!(matches!(estimator.predict(&test), Err(SolverError::FeatureNotFound(_))));
    }

    #[test]
    fn test_classifier_decodes_text_labels() {
        let problem = ProblemSpecification::builder()
            .targets(["label"])
            .predictors(["a"])
            .build();
        let mut estimator = TabularEstimator::new(pipeline("LOGISTIC_REGRESSION"), problem).unwrap();
        let data = ProblemData {
            x: Some(df!("a" => &[-2.0, -1.5, -1.0, 1.0, 1.5, 2.0]).unwrap()),
            y: Some(df!("label" => &["no", "no", "no", "yes", "yes", "yes"]).unwrap()),
            ..ProblemData::default()
        };
        estimator.fit(&data, None).unwrap();
        let out = estimator.predict(&data).unwrap();
        let labels = column_str(&out, "label").unwrap();
        assert_eq!(labels[0].as_deref(), Some("no"));
        assert_eq!(labels[5].as_deref(), Some("yes"));

        let proba = estimator.predict_proba(&data).unwrap();
        assert_eq!(column_names(&proba), vec!["no", "yes"]);
    }

    #[test]
    fn test_regressor_has_no_proba() {
        let mut estimator = TabularEstimator::new(pipeline("ORDINARY_LEAST_SQUARES"), regression_problem()).unwrap();
        let data = ProblemData {
            x: Some(df!("a" => &[0.0, 1.0]).unwrap()),
            y: Some(df!("y" => &[0.0, 1.0]).unwrap()),
            ..ProblemData::default()
        };
        estimator.fit(&data, None).unwrap();
        assert!(matches!(
            estimator.predict_proba(&data),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_forecasting_requires_capability() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .forecasting(true)
            .ordering("t")
            .build();
        assert!(matches!(
            TabularEstimator::new(pipeline("ORDINARY_LEAST_SQUARES"), problem),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_drift_baseline_forecasts_ahead() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .forecasting(true)
            .ordering("t")
            .build();
        let spec = PipelineSpecification::new(
            ModelSpecification::new("tabular", "BASELINE_REGRESSOR").with_param("method", json!("DRIFT")),
        );
        let mut estimator = TabularEstimator::new(spec, problem).unwrap();
        let train = df!("t" => &[0i64, 1, 2, 3], "y" => &[0.0, 1.0, 2.0, 3.0]).unwrap();
        estimator.fit(&ProblemData::from_y(train), None).unwrap();

        let test = df!("t" => &[3i64, 5]).unwrap();
        let out = estimator.predict(&ProblemData::from_y(test)).unwrap();
        let y = column_f64(&out, "y").unwrap();
        // slope is (3 - 0) / 4
        assert_eq!(y[0], Some(3.0));
        assert_eq!(y[1], Some(3.0 + 2.0 * 0.75));

        let fitted = estimator.fitted_values().unwrap();
        assert_eq!(fitted.height(), 4);
        assert_eq!(estimator.describe().unwrap()["all_parameters"]["method"], json!("DRIFT"));
    }

    #[test]
    fn test_baseline_on_datetime_ordering() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .forecasting(true)
            .ordering("t")
            .build();
        let spec = PipelineSpecification::new(
            ModelSpecification::new("tabular", "BASELINE_REGRESSOR").with_param("method", json!("NAIVE")),
        );
        let mut estimator = TabularEstimator::new(spec, problem).unwrap();
        let day = 86_400_000i64;
        let train = DataFrame::new(vec![
            datetime_column("t", (0..5).map(|d| Some(d * day)).collect()).unwrap(),
            f64_column("y", vec![Some(1.0), Some(2.0), Some(4.0), Some(8.0), Some(16.0)]),
        ])
        .unwrap();
        estimator.fit(&ProblemData::from_y(train), None).unwrap();

        let test = DataFrame::new(vec![datetime_column("t", vec![Some(7 * day)]).unwrap()]).unwrap();
        let out = estimator.predict(&ProblemData::from_y(test)).unwrap();
        assert_eq!(column_f64(&out, "y").unwrap(), vec![Some(16.0)]);
    }
}
