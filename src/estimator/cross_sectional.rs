//! Composite estimator fitting one nested solution per cross-section
//! partition ("treatment").

use super::{read_json, write_json, Library};
use crate::error::{Result, SolverError};
use crate::preprocessing::ProblemData;
use crate::solution::Solution;
use crate::specification::{PipelineSpecification, TrainSpecification};
use crate::utils::frame::{column_names, column_str, datetime_column, f64_column, str_column, take_rows, with_columns};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const TREATMENTS_FILE: &str = "model_treatments.json";
pub const ESTIMATORS_DIR: &str = "estimators";

#[derive(Debug, Serialize, Deserialize)]
struct Treatment {
    name: Vec<String>,
    id: String,
}

#[derive(Debug, Clone)]
struct Partition {
    key: Vec<String>,
    solution: Solution,
}

/// Rows of one observed combination of cross-section values
struct Group {
    id: String,
    key: Vec<String>,
    rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CrossSectionalEstimator {
    inner_pipeline: PipelineSpecification,
    inner_train: TrainSpecification,
    cross_sections: Vec<String>,
    partitions: BTreeMap<String, Partition>,
    pub(crate) data_specification: Option<Value>,
}

impl CrossSectionalEstimator {
    pub fn new(pipeline: &PipelineSpecification, train: &TrainSpecification) -> Result<Self> {
        let inner_pipeline = pipeline.model.inner_pipeline()?;
        if Library::from_name(&inner_pipeline.model.library)? == Library::CrossSectional {
            return Err(SolverError::invalid("cross-sectional pipelines cannot be nested"));
        }
        let cross_sections = train.problem.cross_sections();
        if cross_sections.is_empty() {
            return Err(SolverError::invalid(
                "cross-sectional estimator needs cross-section columns",
            ));
        }
        let mut inner_train = train.clone();
        inner_train.problem.clear_cross_sections();
        // fail on an unusable inner pipeline before any partition is fitted
        Solution::new(inner_pipeline.clone(), inner_train.clone())?;

        Ok(Self {
            inner_pipeline,
            inner_train,
            cross_sections,
            partitions: BTreeMap::new(),
            data_specification: None,
        })
    }

    pub fn cross_sections(&self) -> &[String] {
        &self.cross_sections
    }

    /// Observed partition keys, in key order
    pub fn treatments(&self) -> Vec<Vec<String>> {
        self.partitions.values().map(|p| p.key.clone()).collect()
    }

    fn frame<'a>(data: &'a ProblemData) -> Result<&'a DataFrame> {
        data.frame.as_ref().ok_or_else(|| {
            SolverError::DataError("cross-sectional estimation needs the untransformed frame".to_string())
        })
    }

    /// Group rows by their cross-section values; rows missing any value are skipped
    fn partition(&self, df: &DataFrame) -> Result<Vec<Group>> {
        let columns = self
            .cross_sections
            .iter()
            .map(|c| column_str(df, c))
            .collect::<Result<Vec<_>>>()?;
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for row in 0..df.height() {
            let key: Option<Vec<String>> = columns.iter().map(|c| c[row].clone()).collect();
            let Some(key) = key else { continue };
            let id = serde_json::to_string(&key)?;
            groups
                .entry(id.clone())
                .or_insert_with(|| Group {
                    id,
                    key,
                    rows: Vec::new(),
                })
                .rows
                .push(row);
        }
        Ok(groups.into_values().collect())
    }

    fn fit_group(&self, df: &DataFrame, group: Group) -> Result<(String, Partition)> {
        let mut solution = Solution::new(self.inner_pipeline.clone(), self.inner_train.clone())?;
        solution.fit(Some(take_rows(df, &group.rows)?))?;
        Ok((
            group.id,
            Partition {
                key: group.key,
                solution,
            },
        ))
    }

    pub fn fit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        let df = Self::frame(data)?;
        let groups = self.partition(df)?;
        let fitted = groups
            .into_par_iter()
            .map(|group| self.fit_group(df, group))
            .collect::<Result<Vec<_>>>()?;
        self.partitions = fitted.into_iter().collect();
        self.data_specification = data_specification;
        info!(partitions = self.partitions.len(), "fitted cross-sectional estimator");
        Ok(())
    }

    /// Refit known partitions on their new rows and fit newly observed ones
    pub fn refit(&mut self, data: &ProblemData, data_specification: Option<Value>) -> Result<()> {
        let df = Self::frame(data)?;
        for group in self.partition(df)? {
            match self.partitions.get_mut(&group.id) {
                Some(partition) => {
                    partition.solution.refit(Some(take_rows(df, &group.rows)?), None)?;
                }
                None => {
                    let (id, partition) = self.fit_group(df, group)?;
                    self.partitions.insert(id, partition);
                }
            }
        }
        self.data_specification = data_specification;
        Ok(())
    }

    /// Overwrite the cross-section columns of `frame` with `key`, cast to
    /// the dtypes of `reference` where it has them.
    fn restamp(&self, frame: DataFrame, key: &[String], reference: Option<&DataFrame>) -> Result<DataFrame> {
        let height = frame.height();
        let mut columns = Vec::with_capacity(key.len());
        for (name, value) in self.cross_sections.iter().zip(key) {
            let column = str_column(name, vec![Some(value.clone()); height]);
            let column = match reference.and_then(|r| r.column(name).ok()) {
                Some(original) => column.cast(original.dtype()).unwrap_or(column),
                None => column,
            };
            columns.push(column);
        }
        with_columns(&frame, columns)
    }

    fn predict_with<F>(&self, data: &ProblemData, predict: F) -> Result<DataFrame>
    where
        F: Fn(&Solution, &DataFrame) -> Result<DataFrame>,
    {
        let df = Self::frame(data)?;
        let mut frames = Vec::new();
        for group in self.partition(df)? {
            let Some(partition) = self.partitions.get(&group.id) else {
                warn!(partition = %group.id, rows = group.rows.len(), "no fitted model for partition, dropping");
                continue;
            };
            let out = predict(&partition.solution, &take_rows(df, &group.rows)?)?;
            frames.push(self.restamp(out, &partition.key, Some(df))?);
        }
        self.stack(frames)
    }

    pub fn predict(&self, data: &ProblemData) -> Result<DataFrame> {
        self.predict_with(data, |solution, df| solution.predict(df))
    }

    pub fn predict_proba(&self, data: &ProblemData) -> Result<DataFrame> {
        self.predict_with(data, |solution, df| solution.predict_proba(df))
    }

    pub fn fitted_values(&self) -> Result<DataFrame> {
        let frames = self
            .partitions
            .values()
            .map(|p| {
                let out = p.solution.fitted_values()?;
                self.restamp(out, &p.key, None)
            })
            .collect::<Result<Vec<_>>>()?;
        self.stack(frames)
    }

    /// Vertically concatenate partition outputs, casting each onto the
    /// schema of the first.
    fn stack(&self, frames: Vec<DataFrame>) -> Result<DataFrame> {
        let mut frames = frames.into_iter();
        let Some(mut stacked) = frames.next() else {
            return self.empty_frame();
        };
        let names = column_names(&stacked);
        for frame in frames {
            let aligned = names
                .iter()
                .map(|name| {
                    let target = stacked.column(name)?.dtype().clone();
                    let column = frame.column(name)?;
                    Ok(column.cast(&target)?)
                })
                .collect::<Result<Vec<Column>>>()?;
            stacked.vstack_mut(&DataFrame::new(aligned)?)?;
        }
        Ok(stacked)
    }

    /// Output layout when no partition produced rows
    fn empty_frame(&self) -> Result<DataFrame> {
        let problem = &self.inner_train.problem;
        let mut columns = Vec::new();
        match problem.ordering()? {
            Some(ordering) => columns.push(datetime_column(&ordering, Vec::new())?),
            None => {
                for index in problem.indexes() {
                    columns.push(Column::new(index.as_str().into(), Vec::<Option<i64>>::new()));
                }
            }
        }
        for name in &self.cross_sections {
            columns.push(str_column(name, Vec::new()));
        }
        for target in problem.targets() {
            columns.push(f64_column(&target, Vec::new()));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let estimators = dir.join(ESTIMATORS_DIR);
        fs::create_dir_all(&estimators)?;
        let mut treatments = Vec::with_capacity(self.partitions.len());
        for (ordinal, partition) in self.partitions.values().enumerate() {
            let id = ordinal.to_string();
            partition.solution.save(&estimators.join(&id))?;
            treatments.push(Treatment {
                name: partition.key.clone(),
                id,
            });
        }
        write_json(&dir.join(TREATMENTS_FILE), &treatments)
    }

    pub fn load(dir: &Path, pipeline: &PipelineSpecification, train: &TrainSpecification) -> Result<Self> {
        let mut estimator = Self::new(pipeline, train)?;
        let treatments: Vec<Treatment> = read_json(&dir.join(TREATMENTS_FILE))?;
        for treatment in treatments {
            let solution = Solution::load(&dir.join(ESTIMATORS_DIR).join(&treatment.id))?;
            let id = serde_json::to_string(&treatment.name)?;
            estimator.partitions.insert(
                id,
                Partition {
                    key: treatment.name,
                    solution,
                },
            );
        }
        Ok(estimator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::{ModelSpecification, PreprocessSpecification, ProblemSpecification};
    use serde_json::json;

    fn estimator() -> CrossSectionalEstimator {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .cross_sections(["region"])
            .forecasting(true)
            .ordering("t")
            .build();
        let inner = json!({
            "preprocess": false,
            "model": {"library": "tabular", "strategy": "BASELINE_REGRESSOR", "method": "MEAN"}
        });
        let outer = PipelineSpecification::new(ModelSpecification {
            library: "cross-sectional".to_string(),
            strategy: inner,
            hyperparameters: Default::default(),
        })
        .with_preprocess(PreprocessSpecification::Enabled(false));
        CrossSectionalEstimator::new(&outer, &TrainSpecification::new(problem)).unwrap()
    }

    fn data(df: DataFrame) -> ProblemData {
        ProblemData {
            frame: Some(df),
            ..ProblemData::default()
        }
    }

    #[test]
    fn test_partitions_skip_null_keys() {
        let estimator = estimator();
        let df = df!("region" => &[Some("A"), None, Some("B"), Some("A")]).unwrap();
        let groups = estimator.partition(&df).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, vec!["A".to_string()]);
        assert_eq!(groups[0].rows, vec![0, 3]);
    }

    #[test]
    fn test_unseen_partition_dropped() {
        let mut estimator = estimator();
        let train = df!(
            "t" => &[0i64, 1, 2, 0, 1, 2],
            "region" => &["A", "A", "A", "B", "B", "B"],
            "y" => &[1.0, 2.0, 3.0, 10.0, 20.0, 30.0],
        )
        .unwrap();
        estimator.fit(&data(train), None).unwrap();
        assert_eq!(estimator.treatments().len(), 2);

        let test = df!("t" => &[3i64, 3, 3], "region" => &["A", "B", "C"]).unwrap();
        let out = estimator.predict(&data(test)).unwrap();
        assert_eq!(out.height(), 2);
        let regions = column_str(&out, "region").unwrap();
        assert_eq!(regions, vec![Some("A".to_string()), Some("B".to_string())]);
    }

    #[test]
    fn test_empty_prediction_keeps_layout() {
        let estimator = estimator();
        let out = estimator
            .predict(&data(df!("t" => &[0i64], "region" => &["Z"]).unwrap()))
            .unwrap();
        assert_eq!(out.height(), 0);
        assert_eq!(column_names(&out), vec!["t", "region", "y"]);
        assert!(matches!(
            estimator.fitted_values().map(|f| f.height()),
            Ok(0)
        ));
    }
}
