//! Sub-pipelines composed by the problem preprocessor

use super::constant::DropConstant;
use super::encoder::OneHotEncoder;
use super::imputer::{ConstantImputer, MedianImputer, TemporalImputer};
use super::scaler::StandardScaler;
use super::temporal::TemporalPreprocessor;
use super::{FrameTransform, PreprocessConfig};
use crate::error::{Result, SolverError};
use crate::utils::frame::{column_names, is_numeric, select_existing};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Keeps the listed columns that exist, in list order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSelector {
    pub columns: Vec<String>,
}

impl ColumnSelector {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }
}

impl FrameTransform for ColumnSelector {
    fn fit(&mut self, _df: &DataFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        select_existing(df, &self.columns)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        Ok(df.clone())
    }
}

/// Forecasting pipeline: select, resolve dates, drop constants, interpolate, scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPipeline {
    pub selector: ColumnSelector,
    pub temporal: TemporalPreprocessor,
    pub constant: DropConstant,
    pub imputer: TemporalImputer,
    pub scaler: StandardScaler,
}

impl SeriesPipeline {
    /// A pipeline handed an already fitted temporal step keeps its parameters.
    pub fn new(columns: Vec<String>, temporal: TemporalPreprocessor) -> Self {
        Self {
            selector: ColumnSelector::new(columns),
            temporal,
            constant: DropConstant::new(),
            imputer: TemporalImputer,
            scaler: StandardScaler::new(),
        }
    }

    /// Never drop `columns` as constant, so the estimator always sees them
    pub fn keeping(mut self, columns: Vec<String>) -> Self {
        self.constant = self.constant.keeping(columns);
        self
    }
}

impl FrameTransform for SeriesPipeline {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        let selected = self.selector.transform(df)?;
        if !self.temporal.is_fitted() {
            self.temporal.fit(&selected)?;
        }
        let dated = self.temporal.transform(&selected)?;
        let varying = self.constant.fit_transform(&dated)?;
        let filled = self.imputer.fit_transform(&varying)?;
        self.scaler.fit(&filled)
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let selected = self.selector.transform(df)?;
        let dated = self.temporal.transform(&selected)?;
        let varying = self.constant.transform(&dated)?;
        let filled = self.imputer.transform(&varying)?;
        self.scaler.transform(&filled)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let unscaled = self.scaler.inverse_transform(df)?;
        let filled = self.imputer.inverse_transform(&unscaled)?;
        let restored = self.constant.inverse_transform(&filled)?;
        let dated = self.temporal.inverse_transform(&restored)?;
        self.selector.inverse_transform(&dated)
    }
}

/// Tabular pipeline: numeric columns are median-imputed then scaled;
/// categorical columns are constant-filled and, for predictors, one-hot
/// encoded. Output holds the numeric columns followed by the categorical ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularPipeline {
    pub selector: ColumnSelector,
    /// Selected columns in fit order
    columns: Vec<String>,
    numeric: Vec<String>,
    categorical: Vec<String>,
    median: MedianImputer,
    scaler: StandardScaler,
    fill: ConstantImputer,
    encoder: Option<OneHotEncoder>,
    is_fitted: bool,
}

impl TabularPipeline {
    /// `encode` enables one-hot encoding of the categorical branch
    pub fn new(columns: Vec<String>, config: &PreprocessConfig, encode: bool) -> Self {
        Self {
            selector: ColumnSelector::new(columns),
            columns: Vec::new(),
            numeric: Vec::new(),
            categorical: Vec::new(),
            median: MedianImputer::new(),
            scaler: StandardScaler::new(),
            fill: ConstantImputer::new(config.fill_value.clone()),
            encoder: encode.then(|| OneHotEncoder::new(config.category_limit)),
            is_fitted: false,
        }
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric
    }

    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical
    }

    /// Declared categoricals plus every column whose storage is not numeric
    pub fn fit_with_categoricals(&mut self, df: &DataFrame, declared: &[String]) -> Result<()> {
        let selected = self.selector.transform(df)?;
        let declared: BTreeSet<&String> = declared.iter().collect();

        self.columns = column_names(&selected);
        let (categorical, numeric): (Vec<String>, Vec<String>) =
            self.columns.iter().cloned().partition(|name| {
                declared.contains(name)
                    || selected
                        .column(name)
                        .map(|c| !is_numeric(c.dtype()))
                        .unwrap_or(false)
            });
        self.numeric = numeric;
        self.categorical = categorical;

        let numeric_frame = select_existing(&selected, &self.numeric)?;
        let imputed = self.median.fit_transform(&numeric_frame)?;
        self.scaler.fit(&imputed)?;

        let categorical_frame = select_existing(&selected, &self.categorical)?;
        self.fill.fit(&categorical_frame)?;
        if let Some(encoder) = &mut self.encoder {
            encoder.fit_levels(&categorical_frame)?;
        }
        self.is_fitted = true;
        Ok(())
    }
}

impl FrameTransform for TabularPipeline {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.fit_with_categoricals(df, &[])
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let selected = self.selector.transform(df)?;

        let numeric = select_existing(&selected, &self.numeric)?;
        let numeric = self.scaler.transform(&self.median.transform(&numeric)?)?;

        let categorical = select_existing(&selected, &self.categorical)?;
        let mut categorical = self.fill.transform(&categorical)?;
        if let Some(encoder) = &self.encoder {
            categorical = encoder.transform(&categorical)?;
        }

        let mut columns = numeric.take_columns();
        columns.extend(categorical.take_columns());
        if columns.is_empty() {
            return Ok(DataFrame::empty());
        }
        Ok(DataFrame::new(columns)?)
    }

    /// Passthrough columns (such as indexes) come first, then the fitted
    /// columns in their original order.
    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let mut restored = self.scaler.inverse_transform(&self.median.inverse_transform(df)?)?;
        if let Some(encoder) = &self.encoder {
            restored = encoder.inverse_transform(&restored)?;
        }
        restored = self.fill.inverse_transform(&restored)?;

        let mut order: Vec<String> = column_names(&restored)
            .into_iter()
            .filter(|name| !self.columns.contains(name))
            .collect();
        order.extend(self.columns.iter().cloned());
        select_existing(&restored, &order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::frame::{column_f64, column_str};

    #[test]
    fn test_tabular_roundtrip_with_categoricals() {
        let df = df!(
            "size" => &[Some(1.0), None, Some(3.0)],
            "color" => &[Some("red"), Some("blue"), None],
            "id" => &[0i64, 1, 2],
        )
        .unwrap();
        let mut pipeline = TabularPipeline::new(
            vec!["color".into(), "size".into()],
            &PreprocessConfig::default(),
            true,
        );
        pipeline.fit(&df).unwrap();
        assert_eq!(pipeline.numeric_columns(), &["size".to_string()]);
        assert_eq!(pipeline.categorical_columns(), &["color".to_string()]);

        let out = pipeline.transform(&df).unwrap();
        assert_eq!(column_names(&out), vec!["size", "color_red", "color_blue"]);

        let mut with_id = out.clone();
        with_id.with_column(Column::new("id".into(), &[0i64, 1, 2])).unwrap();
        let back = pipeline.inverse_transform(&with_id).unwrap();
        assert_eq!(column_names(&back), vec!["id", "color", "size"]);
        assert_eq!(column_f64(&back, "size").unwrap()[1], Some(2.0));
        assert_eq!(column_str(&back, "color").unwrap()[2], None);
    }

    #[test]
    fn test_declared_categorical_numeric_column() {
        let df = df!("code" => &[1i64, 2, 1], "x" => &[0.5, 1.5, 2.5]).unwrap();
        let mut pipeline = TabularPipeline::new(
            vec!["code".into(), "x".into()],
            &PreprocessConfig::default(),
            true,
        );
        pipeline
            .fit_with_categoricals(&df, &["code".to_string()])
            .unwrap();
        let out = pipeline.transform(&df).unwrap();
        assert_eq!(column_names(&out), vec!["x", "code_1", "code_2"]);

        let back = pipeline.inverse_transform(&out).unwrap();
        assert_eq!(back.column("code").unwrap().dtype(), &DataType::Int64);
        assert_eq!(
            crate::utils::frame::column_i64(&back, "code").unwrap(),
            vec![Some(1), Some(2), Some(1)]
        );
    }
}
