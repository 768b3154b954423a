//! Mean/variance scaling

use super::FrameTransform;
use crate::error::{Result, SolverError};
use crate::utils::frame::{column_f64, f64_column, is_numeric, with_columns};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Fitted parameters for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColumnScale {
    name: String,
    mean: f64,
    variance: f64,
}

/// Centers numeric columns on their mean and divides by their sample
/// variance. Temporal and text columns pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    params: Vec<ColumnScale>,
    is_fitted: bool,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    fn compute_params(name: &str, values: &[Option<f64>]) -> ColumnScale {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let n = present.len() as f64;
        let mean = if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / n
        };
        let variance = if present.len() > 1 {
            present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            f64::NAN
        };
        ColumnScale {
            name: name.to_string(),
            mean,
            variance: if variance == 0.0 || !variance.is_finite() {
                1.0
            } else {
                variance
            },
        }
    }

    fn map_columns<F>(&self, df: &DataFrame, f: F) -> Result<DataFrame>
    where
        F: Fn(f64, &ColumnScale) -> f64,
    {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let replacements = self
            .params
            .iter()
            .filter(|p| df.column(&p.name).is_ok())
            .map(|p| {
                let values = column_f64(df, &p.name)?
                    .into_iter()
                    .map(|v| v.map(|v| f(v, p)))
                    .collect();
                Ok(f64_column(&p.name, values))
            })
            .collect::<Result<Vec<_>>>()?;
        with_columns(df, replacements)
    }
}

impl FrameTransform for StandardScaler {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.params = df
            .get_columns()
            .iter()
            .filter(|c| is_numeric(c.dtype()))
            .map(|c| {
                let name = c.name().to_string();
                let values = column_f64(df, &name)?;
                Ok(Self::compute_params(&name, &values))
            })
            .collect::<Result<Vec<_>>>()?;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        self.map_columns(df, |v, p| (v - p.mean) / p.variance)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        self.map_columns(df, |v, p| v * p.variance + p.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_roundtrip() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0, 4.0],
            "b" => &[10i64, 10, 10, 10],
            "c" => &["x", "y", "z", "w"],
        )
        .unwrap();
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&df).unwrap();

        let a = column_f64(&scaled, "a").unwrap();
        // mean 2.5, sample variance 5/3
        assert!((a[0].unwrap() + 1.5 / (5.0 / 3.0)).abs() < 1e-12);
        // constant column keeps unit variance
        assert_eq!(column_f64(&scaled, "b").unwrap()[0], Some(0.0));
        assert_eq!(scaler.columns(), vec!["a", "b"]);

        let restored = scaler.inverse_transform(&scaled).unwrap();
        let back = column_f64(&restored, "a").unwrap();
        for (r, o) in back.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((r.unwrap() - o).abs() < 1e-12);
        }
        assert_eq!(restored.column("c").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_unfitted() {
        let df = df!("a" => &[1.0]).unwrap();
        assert!(matches!(
            StandardScaler::new().transform(&df),
            Err(SolverError::ModelNotFitted)
        ));
    }
}
