//! Problem-level preprocessing: routes columns by role through the
//! forecasting or tabular sub-pipelines and reassembles predictions.

use super::pipeline::{SeriesPipeline, TabularPipeline};
use super::temporal::TemporalPreprocessor;
use super::{FrameTransform, PreprocessConfig};
use crate::error::{Result, SolverError};
use crate::specification::ProblemSpecification;
use crate::utils::frame::{
    column_f64, column_names, has_column, select_existing, take_rows, with_columns,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Role-separated view of a frame handed to estimators
#[derive(Debug, Clone, Default)]
pub struct ProblemData {
    pub x: Option<DataFrame>,
    pub y: Option<DataFrame>,
    pub indexes: Option<DataFrame>,
    pub weight: Option<Vec<f64>>,
    /// Untransformed input, kept when preprocessing is disabled
    pub frame: Option<DataFrame>,
}

fn weights_of(problem: &ProblemSpecification, df: &DataFrame) -> Result<Option<Vec<f64>>> {
    match problem.weighting() {
        Some(w) if has_column(df, &w) => Ok(Some(
            column_f64(df, &w)?
                .into_iter()
                .map(|v| v.unwrap_or(1.0))
                .collect(),
        )),
        _ => Ok(None),
    }
}

fn indexes_of(problem: &ProblemSpecification, df: &DataFrame) -> Result<Option<DataFrame>> {
    let indexes = problem.indexes();
    if indexes.iter().all(|i| has_column(df, i)) {
        return Ok(Some(select_existing(df, &indexes)?));
    }
    Ok(None)
}

impl ProblemData {
    pub fn from_y(y: DataFrame) -> Self {
        Self {
            y: Some(y),
            ..Self::default()
        }
    }

    /// Split a raw frame by role without transforming any values
    pub fn from_frame(problem: &ProblemSpecification, frame: &DataFrame) -> Result<Self> {
        let targets = problem.targets();
        let has_targets = targets.iter().any(|t| has_column(frame, t));
        let mut data = Self {
            weight: weights_of(problem, frame)?,
            frame: Some(frame.clone()),
            ..Self::default()
        };

        if let Some(ordering) = problem.ordering()? {
            let mut y_columns = vec![ordering.clone()];
            y_columns.extend(targets);
            data.y = Some(select_existing(frame, &y_columns)?);
            let exogenous = problem.exogenous();
            if exogenous.iter().any(|e| has_column(frame, e)) {
                let mut x_columns = vec![ordering];
                x_columns.extend(exogenous);
                data.x = Some(select_existing(frame, &x_columns)?);
            }
        } else {
            data.x = Some(select_existing(frame, &problem.predictors()?)?);
            if has_targets {
                data.y = Some(select_existing(frame, &targets)?);
            }
            data.indexes = indexes_of(problem, frame)?;
        }
        Ok(data)
    }

    /// Rows described by this data
    pub fn height(&self) -> usize {
        [&self.x, &self.y, &self.indexes]
            .iter()
            .filter_map(|f| f.as_ref())
            .filter(|f| f.width() > 0)
            .map(|f| f.height())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum Transformers {
    Series {
        x: Option<SeriesPipeline>,
        y: SeriesPipeline,
    },
    Tabular {
        x: TabularPipeline,
        y: TabularPipeline,
    },
}

/// Fits one pair of sub-pipelines over a problem's columns.
///
/// Forecasting problems use [`SeriesPipeline`]s for targets and exogenous
/// columns sharing one fitted time index. Other problems use
/// [`TabularPipeline`]s over predictors and targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemPreprocessor {
    problem: ProblemSpecification,
    config: PreprocessConfig,
    transformers: Option<Transformers>,
}

fn reject_secondary(y: Option<&DataFrame>) -> Result<()> {
    if y.is_some() {
        return Err(SolverError::invalid("y must be None"));
    }
    Ok(())
}

impl ProblemPreprocessor {
    pub fn new(problem: ProblemSpecification, config: PreprocessConfig) -> Self {
        Self {
            problem,
            config,
            transformers: None,
        }
    }

    pub fn problem(&self) -> &ProblemSpecification {
        &self.problem
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.transformers.is_some()
    }

    /// Fitted temporal step of a forecasting problem
    pub fn temporal(&self) -> Option<&TemporalPreprocessor> {
        match &self.transformers {
            Some(Transformers::Series { y, .. }) => Some(&y.temporal),
            _ => None,
        }
    }

    /// Drop rows missing a value in any target column present in `df`
    pub fn drop_null_targets(&self, df: &DataFrame) -> Result<DataFrame> {
        let targets: Vec<String> = self
            .problem
            .targets()
            .into_iter()
            .filter(|t| has_column(df, t))
            .collect();
        if targets.is_empty() {
            return Ok(df.clone());
        }
        let masks = targets
            .iter()
            .map(|t| Ok(df.column(t)?.is_not_null()))
            .collect::<Result<Vec<BooleanChunked>>>()?;
        let keep: Vec<usize> = (0..df.height())
            .filter(|&row| masks.iter().all(|m| m.get(row).unwrap_or(false)))
            .collect();
        if keep.len() == df.height() {
            return Ok(df.clone());
        }
        debug!(dropped = df.height() - keep.len(), "dropping rows with missing targets");
        take_rows(df, &keep)
    }

    pub fn fit(&mut self, df: &DataFrame, y: Option<&DataFrame>) -> Result<()> {
        reject_secondary(y)?;
        let df = self.drop_null_targets(df)?;

        let transformers = if self.problem.is_forecasting() {
            let temporal = TemporalPreprocessor::from_problem(&self.problem, self.config.resample)?;
            let mut y_pipeline =
                SeriesPipeline::new(self.problem.y()?, temporal).keeping(self.problem.targets());
            y_pipeline.fit(&df)?;

            let exogenous = self.problem.exogenous();
            let x_pipeline = if exogenous.is_empty() {
                None
            } else {
                let mut columns = exogenous;
                columns.extend(self.problem.ordering()?);
                let mut pipeline = SeriesPipeline::new(columns, y_pipeline.temporal.clone());
                pipeline.fit(&df)?;
                Some(pipeline)
            };
            Transformers::Series {
                x: x_pipeline,
                y: y_pipeline,
            }
        } else {
            let categoricals = self.problem.categoricals();
            let mut x_pipeline = TabularPipeline::new(self.problem.predictors()?, &self.config, true);
            x_pipeline.fit_with_categoricals(&df, &categoricals)?;
            let mut y_pipeline = TabularPipeline::new(self.problem.targets(), &self.config, false);
            y_pipeline.fit_with_categoricals(&df, &categoricals)?;
            Transformers::Tabular {
                x: x_pipeline,
                y: y_pipeline,
            }
        };
        self.transformers = Some(transformers);
        Ok(())
    }

    pub fn transform(&self, df: &DataFrame, y: Option<&DataFrame>) -> Result<ProblemData> {
        reject_secondary(y)?;
        let transformers = self.transformers.as_ref().ok_or(SolverError::ModelNotFitted)?;

        match transformers {
            Transformers::Series { x, y } => Ok(ProblemData {
                x: x.as_ref().map(|p| p.transform(df)).transpose()?,
                y: Some(y.transform(df)?),
                ..ProblemData::default()
            }),
            Transformers::Tabular { x, y } => {
                let has_targets = self.problem.targets().iter().any(|t| has_column(df, t));
                Ok(ProblemData {
                    x: Some(x.transform(df)?),
                    y: if has_targets { Some(y.transform(df)?) } else { None },
                    indexes: indexes_of(&self.problem, df)?,
                    weight: weights_of(&self.problem, df)?,
                    frame: None,
                })
            }
        }
    }

    /// Fit on `df` with missing-target rows removed, then transform those rows
    pub fn fit_transform(&mut self, df: &DataFrame) -> Result<ProblemData> {
        let df = self.drop_null_targets(df)?;
        self.fit(&df, None)?;
        self.transform(&df, None)
    }

    /// Map transformed data back to the original column layout: the
    /// inverted predictors, followed by any inverted target columns the
    /// predictors do not already contain.
    pub fn inverse_transform(&self, data: ProblemData, y: Option<&DataFrame>) -> Result<DataFrame> {
        reject_secondary(y)?;
        let transformers = self.transformers.as_ref().ok_or(SolverError::ModelNotFitted)?;

        let attach_indexes = |frame: DataFrame| -> Result<DataFrame> {
            match &data.indexes {
                Some(indexes) if indexes.height() == frame.height() => {
                    let missing: Vec<Column> = indexes
                        .get_columns()
                        .iter()
                        .filter(|c| !has_column(&frame, c.name()))
                        .cloned()
                        .collect();
                    with_columns(&frame, missing)
                }
                _ => Ok(frame),
            }
        };

        let (x_in, y_in) = match transformers {
            Transformers::Series { x, y } => {
                let x_in = match (&data.x, x) {
                    (Some(frame), Some(pipeline)) => Some(pipeline.inverse_transform(frame)?),
                    (Some(frame), None) => Some(frame.clone()),
                    _ => None,
                };
                let y_in = data.y.as_ref().map(|f| y.inverse_transform(f)).transpose()?;
                (x_in, y_in)
            }
            Transformers::Tabular { x, y } => {
                let x_in = data
                    .x
                    .clone()
                    .map(|f| attach_indexes(f).and_then(|f| x.inverse_transform(&f)))
                    .transpose()?;
                let y_in = data
                    .y
                    .clone()
                    .map(|f| attach_indexes(f).and_then(|f| y.inverse_transform(&f)))
                    .transpose()?;
                (x_in, y_in)
            }
        };

        match (x_in, y_in) {
            (Some(x_in), Some(y_in)) => {
                if x_in.height() != y_in.height() {
                    return Err(SolverError::ShapeError {
                        expected: format!("{} rows", x_in.height()),
                        actual: format!("{} rows", y_in.height()),
                    });
                }
                let present = column_names(&x_in);
                let extra: Vec<Column> = y_in
                    .get_columns()
                    .iter()
                    .filter(|c| !present.contains(&c.name().to_string()))
                    .cloned()
                    .collect();
                with_columns(&x_in, extra)
            }
            (Some(x_in), None) => Ok(x_in),
            (None, Some(y_in)) => Ok(y_in),
            (None, None) => Ok(DataFrame::empty()),
        }
    }

    /// Parse the ordering column of `df` with the fitted temporal parameters
    pub fn format_date_index(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.problem.is_forecasting() {
            return Err(SolverError::unsupported(
                "ProblemPreprocessor",
                "format_date_index outside forecasting",
            ));
        }
        let temporal = self.temporal().ok_or(SolverError::ModelNotFitted)?;
        temporal.format(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::frame::{column_datetime_ms, column_str};

    fn tabular_problem() -> ProblemSpecification {
        ProblemSpecification::builder()
            .targets(["y"])
            .predictors(["a", "b", "c"])
            .indexes(["id"])
            .categoricals(["c"])
            .build()
    }

    #[test]
    fn test_rejects_secondary_argument() {
        let df = df!("a" => &[1.0], "y" => &[2.0]).unwrap();
        let mut preprocessor = ProblemPreprocessor::new(tabular_problem(), PreprocessConfig::default());
        assert!(matches!(
            preprocessor.fit(&df, Some(&df)),
            Err(SolverError::InvalidSpecification(_))
        ));
        preprocessor.fit(&df, None).unwrap();
        assert!(preprocessor.transform(&df, Some(&df)).is_err());
        assert!(preprocessor
            .inverse_transform(ProblemData::default(), Some(&df))
            .is_err());
    }

    #[test]
    fn test_numeric_roundtrip() {
        let df = df!(
            "id" => &[0i64, 1, 2, 3],
            "a" => &[1.5, -2.0, 3.25, 10.0],
            "b" => &[7.0, 7.5, 8.0, -1.0],
            "y" => &[0.1, 0.2, 0.3, 0.4],
        )
        .unwrap();
        let mut preprocessor = ProblemPreprocessor::new(tabular_problem(), PreprocessConfig::default());
        let data = preprocessor.fit_transform(&df).unwrap();
        assert!(data.indexes.is_some());

        let restored = preprocessor.inverse_transform(data, None).unwrap();
        for name in ["a", "b", "y"] {
            let original = column_f64(&df, name).unwrap();
            let back = column_f64(&restored, name).unwrap();
            for (o, r) in original.iter().zip(back.iter()) {
                assert!((o.unwrap() - r.unwrap()).abs() < 1e-9);
            }
        }
        assert_eq!(column_names(&restored)[0], "id");
    }

    #[test]
    fn test_missing_targets_dropped_at_fit_only() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0],
            "y" => &[Some(1.0), None, Some(3.0)],
        )
        .unwrap();
        let mut preprocessor = ProblemPreprocessor::new(tabular_problem(), PreprocessConfig::default());
        let data = preprocessor.fit_transform(&df).unwrap();
        assert_eq!(data.x.unwrap().height(), 2);

        let data = preprocessor.transform(&df, None).unwrap();
        assert_eq!(data.x.unwrap().height(), 3);
    }

    #[test]
    fn test_forecasting_shares_time_index() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .predictors(["temp"])
            .exogenous(["temp"])
            .forecasting(true)
            .ordering("date")
            .build();
        let df = df!(
            "date" => &["2021-01-03", "2021-01-01", "2021-01-02"],
            "y" => &[3.0, 1.0, 2.0],
            "temp" => &[30.0, 10.0, 20.0],
        )
        .unwrap();
        let mut preprocessor = ProblemPreprocessor::new(problem, PreprocessConfig::default());
        let data = preprocessor.fit_transform(&df).unwrap();

        let y = data.y.clone().unwrap();
        let x = data.x.clone().unwrap();
        assert_eq!(column_names(&y), vec!["date", "y"]);
        assert_eq!(column_names(&x), vec!["date", "temp"]);
        assert_eq!(
            column_datetime_ms(&y, "date").unwrap(),
            column_datetime_ms(&x, "date").unwrap()
        );
        assert_eq!(
            preprocessor.temporal().unwrap().date_format.as_deref(),
            Some("%Y-%m-%d")
        );

        let restored = preprocessor.inverse_transform(ProblemData::from_y(y), None).unwrap();
        let values = column_f64(&restored, "y").unwrap();
        assert!((values[0].unwrap() - 1.0).abs() < 1e-9);
        assert!((values[2].unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_date_index_requires_forecasting() {
        let preprocessor = ProblemPreprocessor::new(tabular_problem(), PreprocessConfig::default());
        let df = df!("a" => &[1.0]).unwrap();
        assert!(matches!(
            preprocessor.format_date_index(&df),
            Err(SolverError::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_from_frame_splits_roles() {
        let df = df!(
            "id" => &[0i64, 1],
            "a" => &[1.0, 2.0],
            "c" => &["u", "v"],
            "y" => &[5.0, 6.0],
        )
        .unwrap();
        let data = ProblemData::from_frame(&tabular_problem(), &df).unwrap();
        assert_eq!(column_names(data.x.as_ref().unwrap()), vec!["a", "c"]);
        assert_eq!(column_str(data.x.as_ref().unwrap(), "c").unwrap()[1].as_deref(), Some("v"));
        assert_eq!(column_names(data.indexes.as_ref().unwrap()), vec!["id"]);
        assert!(data.frame.is_some());
    }
}
