//! Solutions: one preprocessor paired with one estimator, fitted and
//! persisted together.

use crate::error::{Result, SolverError};
use crate::estimator::{read_json, write_json, Estimator, Library};
use crate::preprocessing::{ProblemData, ProblemPreprocessor};
use crate::specification::{PipelineSpecification, ProblemSpecification, TrainSpecification, INPUT_DATASET};
use crate::utils::frame::datetime_column;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

pub const SOLUTION_FILE: &str = "solution.json";
pub const PREPROCESS_FILE: &str = "preprocess.json";

#[derive(Debug, Serialize, Deserialize)]
struct SolutionManifest {
    pipeline_specification: PipelineSpecification,
    train_specification: TrainSpecification,
    data_specification: Option<Value>,
    library: Library,
}

/// A candidate pipeline bound to a training session.
///
/// Constructed unfitted; `fit` (re)builds the preprocessor and estimator
/// from scratch, after which `predict`, `predict_proba`, `fitted_values`
/// and `refit` become available.
#[derive(Debug, Clone)]
pub struct Solution {
    pipeline: PipelineSpecification,
    train: TrainSpecification,
    preprocessor: Option<ProblemPreprocessor>,
    estimator: Estimator,
    data_specification: Option<Value>,
    is_fitted: bool,
}

impl Solution {
    pub fn new(pipeline: PipelineSpecification, mut train: TrainSpecification) -> Result<Self> {
        let metric = train.performance_metric();
        train.problem.set_performance_metric(metric);
        let estimator = Estimator::new(&pipeline, &train)?;
        Ok(Self {
            pipeline,
            train,
            preprocessor: None,
            estimator,
            data_specification: None,
            is_fitted: false,
        })
    }

    pub fn pipeline(&self) -> &PipelineSpecification {
        &self.pipeline
    }

    pub fn problem(&self) -> &ProblemSpecification {
        &self.train.problem
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn preprocessor(&self) -> Option<&ProblemPreprocessor> {
        self.preprocessor.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn require_fitted(&self) -> Result<()> {
        if self.is_fitted {
            Ok(())
        } else {
            Err(SolverError::ModelNotFitted)
        }
    }

    fn resolve(&self, data: Option<DataFrame>) -> Result<DataFrame> {
        match data {
            Some(df) => Ok(df),
            None => self.train.get_dataframe(INPUT_DATASET),
        }
    }

    /// Fit a fresh preprocessor (when enabled) and return it with the data
    /// the estimator trains on. `self` is left untouched.
    fn prepare_fit(&self, df: &DataFrame) -> Result<(Option<ProblemPreprocessor>, ProblemData)> {
        match self.pipeline.preprocess_config() {
            Some(config) => {
                let mut preprocessor = ProblemPreprocessor::new(self.train.problem.clone(), config);
                let prepared = preprocessor.fit_transform(df)?;
                Ok((Some(preprocessor), prepared))
            }
            None => Ok((None, ProblemData::from_frame(&self.train.problem, df)?)),
        }
    }

    fn prepare(&self, df: &DataFrame) -> Result<ProblemData> {
        match &self.preprocessor {
            Some(preprocessor) => preprocessor.transform(df, None),
            None => ProblemData::from_frame(&self.train.problem, df),
        }
    }

    fn restore(&self, out: DataFrame) -> Result<DataFrame> {
        match &self.preprocessor {
            Some(preprocessor) => preprocessor.inverse_transform(ProblemData::from_y(out), None),
            None => Ok(out),
        }
    }

    /// Fit on `data`, or on the session's input dataset when `None`
    pub fn fit(&mut self, data: Option<DataFrame>) -> Result<()> {
        self.fit_with_specification(data, None)
    }

    pub fn fit_with_specification(
        &mut self,
        data: Option<DataFrame>,
        data_specification: Option<Value>,
    ) -> Result<()> {
        let df = self.resolve(data)?;
        info!(
            library = %self.pipeline.model.library,
            strategy = %self.pipeline.model.strategy,
            rows = df.height(),
            "fitting solution"
        );
        let (preprocessor, prepared) = self.prepare_fit(&df)?;
        let mut estimator = Estimator::new(&self.pipeline, &self.train)?;
        estimator.fit(&prepared, data_specification.clone())?;

        self.preprocessor = preprocessor;
        self.estimator = estimator;
        self.data_specification = data_specification;
        self.is_fitted = true;
        Ok(())
    }

    /// Re-estimate parameters on new data with the same hyperparameters.
    /// Skipped when `data_specification` equals the one of the last fit.
    pub fn refit(&mut self, data: Option<DataFrame>, data_specification: Option<Value>) -> Result<()> {
        if !self.is_fitted {
            return self.fit_with_specification(data, data_specification);
        }
        if let (Some(previous), Some(next)) = (&self.data_specification, &data_specification) {
            if previous == next {
                return Ok(());
            }
        }
        let df = self.resolve(data)?;
        let (preprocessor, prepared) = self.prepare_fit(&df)?;
        let mut estimator = self.estimator.clone();
        estimator.refit(&prepared, data_specification.clone())?;

        self.preprocessor = preprocessor;
        self.estimator = estimator;
        self.data_specification = data_specification;
        info!(rows = df.height(), "refitted solution");
        Ok(())
    }

    pub fn predict(&self, df: &DataFrame) -> Result<DataFrame> {
        self.require_fitted()?;
        let data = self.prepare(df)?;
        let out = self.estimator.predict(&data)?;
        self.restore(out)
    }

    /// Class probabilities on the transformed scale; never inverse transformed
    pub fn predict_proba(&self, df: &DataFrame) -> Result<DataFrame> {
        self.require_fitted()?;
        let data = self.prepare(df)?;
        self.estimator.predict_proba(&data)
    }

    pub fn fitted_values(&self) -> Result<DataFrame> {
        self.require_fitted()?;
        let out = self.estimator.fitted_values()?;
        self.restore(out)
    }

    pub fn describe(&self) -> Result<Value> {
        self.estimator.describe()
    }

    /// Frame of `steps` ordering instants continuing the fitted series at
    /// its cadence, ready to pass to [`Solution::predict`].
    pub fn get_future_dataframe(&self, steps: usize) -> Result<DataFrame> {
        let problem = &self.train.problem;
        if !problem.is_forecasting() {
            return Err(SolverError::invalid(
                "future frames exist only for forecasting problems",
            ));
        }
        if !problem.exogenous().is_empty() {
            return Err(SolverError::invalid(
                "cannot build a future frame for a problem with exogenous variables",
            ));
        }
        self.require_fitted()?;
        let ordering = problem
            .ordering()?
            .ok_or_else(|| SolverError::invalid("forecasting problem has no ordering column"))?;
        let temporal = self
            .preprocessor
            .as_ref()
            .and_then(|p| p.temporal())
            .ok_or_else(|| SolverError::unsupported("solution", "future frames without preprocessing"))?;
        let instants = temporal.future_index(steps)?;
        let column = datetime_column(&ordering, instants.into_iter().map(Some).collect())?;
        Ok(DataFrame::new(vec![column])?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.require_fitted()?;
        fs::create_dir_all(dir)?;
        let manifest = SolutionManifest {
            pipeline_specification: self.pipeline.clone(),
            train_specification: self.train.clone(),
            data_specification: self.data_specification.clone(),
            library: self.estimator.library(),
        };
        write_json(&dir.join(SOLUTION_FILE), &manifest)?;
        if let Some(preprocessor) = &self.preprocessor {
            write_json(&dir.join(PREPROCESS_FILE), preprocessor)?;
        }
        self.estimator.save(dir)?;
        info!(path = %dir.display(), "saved solution");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let manifest: SolutionManifest = read_json(&dir.join(SOLUTION_FILE))?;
        let preprocess_path = dir.join(PREPROCESS_FILE);
        let preprocessor = if preprocess_path.exists() {
            Some(read_json(&preprocess_path)?)
        } else {
            None
        };
        let estimator = Estimator::load(
            dir,
            manifest.library,
            &manifest.pipeline_specification,
            &manifest.train_specification,
        )?;
        info!(path = %dir.display(), library = %manifest.library, "loaded solution");
        Ok(Self {
            pipeline: manifest.pipeline_specification,
            train: manifest.train_specification,
            preprocessor,
            estimator,
            data_specification: manifest.data_specification,
            is_fitted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::{ModelSpecification, PreprocessSpecification};
    use crate::utils::frame::{column_f64, column_names};
    use serde_json::json;

    fn regression() -> (PipelineSpecification, TrainSpecification) {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .predictors(["a", "b"])
            .build();
        (
            PipelineSpecification::new(ModelSpecification::new("tabular", "ORDINARY_LEAST_SQUARES")),
            TrainSpecification::new(problem),
        )
    }

    fn frame() -> DataFrame {
        df!(
            "d3mIndex" => &[0i64, 1, 2, 3, 4, 5],
            "a" => &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            "b" => &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            "y" => &[2.0, 3.0, 6.0, 7.0, 10.0, 11.0],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_before_fit() {
        let (pipeline, train) = regression();
        let solution = Solution::new(pipeline, train).unwrap();
        assert!(matches!(solution.predict(&frame()), Err(SolverError::ModelNotFitted)));
    }

    #[test]
    fn test_fit_predict_restores_scale() {
        let (pipeline, train) = regression();
        let mut solution = Solution::new(pipeline, train).unwrap();
        solution.fit(Some(frame())).unwrap();
        assert_eq!(
            solution.problem().performance_metric(),
            Some(&json!({"metric": "MEAN_SQUARED_ERROR"}))
        );

        let out = solution.predict(&frame()).unwrap();
        assert_eq!(column_names(&out), vec!["d3mIndex", "y"]);
        // y = 1 + 2a + b exactly
        let y = column_f64(&out, "y").unwrap();
        assert!((y[4].unwrap() - 10.0).abs() < 1e-6);
        assert!((y[5].unwrap() - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_refit_is_memoized() {
        let (pipeline, train) = regression();
        let mut solution = Solution::new(pipeline, train).unwrap();
        let spec = json!({"dataset": "a"});
        solution.refit(Some(frame()), Some(spec.clone())).unwrap();
        assert!(solution.is_fitted());
        // an empty frame would fail to fit, so success means nothing ran
        let empty = frame().head(Some(0));
        solution.refit(Some(empty.clone()), Some(spec)).unwrap();
        assert!(solution.refit(Some(empty), Some(json!({"dataset": "b"}))).is_err());
    }

    #[test]
    fn test_failed_refit_keeps_previous_state() {
        let (pipeline, train) = regression();
        let mut solution = Solution::new(pipeline, train).unwrap();
        solution.refit(Some(frame()), Some(json!({"dataset": "a"}))).unwrap();
        let before = solution.predict(&frame()).unwrap();

        let empty = frame().head(Some(0));
        assert!(solution.refit(Some(empty.clone()), Some(json!({"dataset": "b"}))).is_err());
        assert!(solution.is_fitted());
        assert!(solution.preprocessor().map_or(false, |p| p.is_fitted()));
        let after = solution.predict(&frame()).unwrap();
        assert_eq!(column_f64(&after, "y").unwrap(), column_f64(&before, "y").unwrap());

        // the failed refit did not record its data specification
        solution.refit(Some(empty), Some(json!({"dataset": "a"}))).unwrap();
    }

    #[test]
    fn test_failed_fit_keeps_previous_state() {
        let (pipeline, train) = regression();
        let mut solution = Solution::new(pipeline, train).unwrap();
        solution.fit(Some(frame())).unwrap();
        assert!(solution.fit(Some(frame().head(Some(0)))).is_err());
        assert!(solution.is_fitted());
        assert_eq!(solution.predict(&frame()).unwrap().height(), 6);
    }

    #[test]
    fn test_future_frame_needs_forecasting() {
        let (pipeline, train) = regression();
        let mut solution = Solution::new(pipeline, train).unwrap();
        solution.fit(Some(frame())).unwrap();
        assert!(matches!(
            solution.get_future_dataframe(3),
            Err(SolverError::InvalidSpecification(_))
        ));
    }

    #[test]
    fn test_disabled_preprocessing_passes_frame_through() {
        let (pipeline, train) = regression();
        let pipeline = pipeline.with_preprocess(PreprocessSpecification::Enabled(false));
        let mut solution = Solution::new(pipeline, train).unwrap();
        solution.fit(Some(frame())).unwrap();
        assert!(solution.preprocessor().is_none());
        let out = solution.predict(&frame()).unwrap();
        assert_eq!(out.height(), 6);
    }
}
