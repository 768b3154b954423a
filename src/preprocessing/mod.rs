//! Invertible preprocessing of problem data
//!
//! Provides:
//! - Time-ordering normalization and resampling for forecasting problems
//! - Cadence and date-format inference
//! - Median / constant / interpolating imputers
//! - Mean-variance scaling, one-hot encoding and constant column removal
//! - [`ProblemPreprocessor`], which composes the above per problem

pub mod constant;
pub mod date_offset;
pub mod encoder;
pub mod frequency;
pub mod imputer;
pub mod pipeline;
pub mod problem;
pub mod scaler;
pub mod temporal;

pub use constant::DropConstant;
pub use date_offset::DateOffset;
pub use encoder::OneHotEncoder;
pub use imputer::{ConstantImputer, MedianImputer, TemporalImputer};
pub use pipeline::{ColumnSelector, SeriesPipeline, TabularPipeline};
pub use problem::{ProblemData, ProblemPreprocessor};
pub use scaler::StandardScaler;
pub use temporal::{format_date_index, resample_date_index, TemporalPreprocessor};

use crate::error::Result;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// A fitted, invertible frame-to-frame step
pub trait FrameTransform {
    fn fit(&mut self, df: &DataFrame) -> Result<()>;

    fn transform(&self, df: &DataFrame) -> Result<DataFrame>;

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame>;

    fn fit_transform(&mut self, df: &DataFrame) -> Result<DataFrame> {
        self.fit(df)?;
        self.transform(df)
    }
}

/// Preprocessing options carried by a pipeline specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Regularize forecasting series onto a fixed cadence
    pub resample: bool,
    /// Most frequent levels kept per one-hot encoded column
    pub category_limit: usize,
    /// Label for missing categorical values
    pub fill_value: String,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            resample: false,
            category_limit: 20,
            fill_value: "missing".to_string(),
        }
    }
}

impl PreprocessConfig {
    pub fn with_resample(mut self, resample: bool) -> Self {
        self.resample = resample;
        self
    }

    pub fn with_category_limit(mut self, limit: usize) -> Self {
        self.category_limit = limit;
        self
    }

    pub fn with_fill_value(mut self, fill_value: impl Into<String>) -> Self {
        self.fill_value = fill_value.into();
        self
    }
}
