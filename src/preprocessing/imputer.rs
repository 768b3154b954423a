//! Missing value imputation.
//!
//! Numeric imputation is not undone on inverse: filled values stay filled.

use super::FrameTransform;
use crate::error::{Result, SolverError};
use crate::utils::frame::{
    column_f64, column_str, f64_column, is_integral, is_temporal, str_column, with_columns,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Replaces missing numeric values with the fitted column median
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    medians: Vec<(String, f64)>,
    is_fitted: bool,
}

fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    Some(if present.len() % 2 == 0 {
        (present[mid - 1] + present[mid]) / 2.0
    } else {
        present[mid]
    })
}

impl MedianImputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn median_of(&self, name: &str) -> Option<f64> {
        self.medians.iter().find(|(n, _)| n == name).map(|(_, m)| *m)
    }
}

impl FrameTransform for MedianImputer {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.medians = df
            .get_column_names()
            .iter()
            .map(|name| {
                let values = column_f64(df, name)?;
                Ok((name.to_string(), median(&values).unwrap_or(0.0)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let filled = self
            .medians
            .iter()
            .filter(|(name, _)| df.column(name).is_ok())
            .map(|(name, fill)| {
                let values = column_f64(df, name)?
                    .into_iter()
                    .map(|v| Some(v.filter(|x| !x.is_nan()).unwrap_or(*fill)))
                    .collect();
                Ok(f64_column(name, values))
            })
            .collect::<Result<Vec<_>>>()?;
        with_columns(df, filled)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        Ok(df.clone())
    }
}

/// Storage kind of a categorical column before it was filled as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StoredKind {
    Integer,
    Float,
    Text,
}

impl StoredKind {
    fn of(dtype: &DataType) -> Self {
        if is_integral(dtype) {
            StoredKind::Integer
        } else if matches!(dtype, DataType::Float32 | DataType::Float64) {
            StoredKind::Float
        } else {
            StoredKind::Text
        }
    }

    fn dtype(self) -> Option<DataType> {
        match self {
            StoredKind::Integer => Some(DataType::Int64),
            StoredKind::Float => Some(DataType::Float64),
            StoredKind::Text => None,
        }
    }
}

/// Replaces missing categorical values with a constant label.
///
/// Columns are filled as text; inverse casts numeric columns back, turning
/// the fill label into a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantImputer {
    fill_value: String,
    columns: Vec<(String, StoredKind)>,
}

impl ConstantImputer {
    pub fn new(fill_value: impl Into<String>) -> Self {
        Self {
            fill_value: fill_value.into(),
            columns: Vec::new(),
        }
    }
}

impl FrameTransform for ConstantImputer {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.columns = df
            .get_columns()
            .iter()
            .map(|c| (c.name().to_string(), StoredKind::of(c.dtype())))
            .collect();
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let filled = self
            .columns
            .iter()
            .filter(|(name, _)| df.column(name).is_ok())
            .map(|(name, _)| {
                let values = column_str(df, name)?
                    .into_iter()
                    .map(|v| Some(v.unwrap_or_else(|| self.fill_value.clone())))
                    .collect();
                Ok(str_column(name, values))
            })
            .collect::<Result<Vec<_>>>()?;
        with_columns(df, filled)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let restored = self
            .columns
            .iter()
            .filter_map(|(name, kind)| Some((df.column(name).ok()?, kind.dtype()?)))
            .map(|(column, dtype)| Ok(column.cast(&dtype)?))
            .collect::<Result<Vec<Column>>>()?;
        with_columns(df, restored)
    }
}

/// Positional linear interpolation over a time-sorted frame.
///
/// Interior gaps are interpolated; trailing gaps repeat the last valid
/// value; leading gaps stay missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalImputer;

pub(crate) fn interpolate_linear(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut last_valid: Option<usize> = None;
    for i in 0..values.len() {
        let Some(v) = values[i] else { continue };
        if let Some(prev) = last_valid {
            if i - prev > 1 {
                let start = values[prev].unwrap_or(v);
                let step = (v - start) / (i - prev) as f64;
                for (k, slot) in out.iter_mut().enumerate().take(i).skip(prev + 1) {
                    *slot = Some(start + step * (k - prev) as f64);
                }
            }
        }
        last_valid = Some(i);
    }
    if let Some(prev) = last_valid {
        let fill = values[prev];
        for slot in out.iter_mut().skip(prev + 1) {
            *slot = fill;
        }
    }
    out
}

impl FrameTransform for TemporalImputer {
    fn fit(&mut self, _df: &DataFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let filled = df
            .get_columns()
            .iter()
            .filter(|c| !is_temporal(c.dtype()) && c.null_count() > 0)
            .map(|c| {
                let name = c.name().to_string();
                let values = interpolate_linear(&column_f64(df, &name)?);
                Ok(f64_column(&name, values))
            })
            .collect::<Result<Vec<_>>>()?;
        with_columns(df, filled)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        Ok(df.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_fill() {
        let df = df!("a" => &[Some(1.0), None, Some(3.0), Some(10.0)]).unwrap();
        let mut imputer = MedianImputer::new();
        let out = imputer.fit_transform(&df).unwrap();
        assert_eq!(imputer.median_of("a"), Some(3.0));
        assert_eq!(column_f64(&out, "a").unwrap()[1], Some(3.0));
    }

    #[test]
    fn test_all_null_median_is_zero() {
        let df = df!("a" => &[None::<f64>, None]).unwrap();
        let mut imputer = MedianImputer::new();
        let out = imputer.fit_transform(&df).unwrap();
        assert_eq!(column_f64(&out, "a").unwrap(), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_constant_fill() {
        let df = df!("c" => &[Some("x"), None]).unwrap();
        let mut imputer = ConstantImputer::new("missing");
        let out = imputer.fit_transform(&df).unwrap();
        assert_eq!(
            column_str(&out, "c").unwrap(),
            vec![Some("x".to_string()), Some("missing".to_string())]
        );
    }

    #[test]
    fn test_constant_fill_restores_numeric_dtype() {
        let df = df!("c" => &[Some(1i64), None, Some(2)]).unwrap();
        let mut imputer = ConstantImputer::new("missing");
        let filled = imputer.fit_transform(&df).unwrap();
        assert_eq!(filled.column("c").unwrap().dtype(), &DataType::String);

        let restored = imputer.inverse_transform(&filled).unwrap();
        assert_eq!(restored.column("c").unwrap().dtype(), &DataType::Int64);
        assert_eq!(
            crate::utils::frame::column_i64(&restored, "c").unwrap(),
            vec![Some(1), None, Some(2)]
        );
    }

    #[test]
    fn test_interpolation_edges() {
        let values = vec![None, Some(1.0), None, None, Some(4.0), None];
        assert_eq!(
            interpolate_linear(&values),
            vec![None, Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );
    }
}
