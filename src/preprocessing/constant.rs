//! Constant column removal

use super::FrameTransform;
use crate::error::{Result, SolverError};
use crate::utils::frame::{column_names, column_str, drop_columns, is_numeric, is_temporal};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ConstantColumn {
    position: usize,
    name: String,
    value: Value,
}

/// Drops columns holding a single repeated, non-missing value and restores
/// them at their original position on inverse. Columns listed in `kept`
/// are never dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropConstant {
    constants: Vec<ConstantColumn>,
    #[serde(default)]
    kept: Vec<String>,
    is_fitted: bool,
}

fn constant_value(column: &Column) -> Result<Option<Value>> {
    if column.len() == 0 || column.null_count() > 0 {
        return Ok(None);
    }
    if is_numeric(column.dtype()) {
        let casted = column.cast(&DataType::Float64)?;
        let values: Vec<Option<f64>> = casted.f64()?.into_iter().collect();
        let first = values[0];
        if values.iter().all(|v| *v == first) {
            return Ok(first.and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)));
        }
        return Ok(None);
    }
    let df = DataFrame::new(vec![column.clone()])?;
    let values = column_str(&df, column.name())?;
    let first = values[0].clone();
    if values.iter().all(|v| *v == first) {
        return Ok(first.map(Value::String));
    }
    Ok(None)
}

fn repeat_column(name: &str, value: &Value, height: usize) -> Column {
    match value {
        Value::Number(n) => Column::new(name.into(), vec![n.as_f64(); height]),
        Value::String(s) => Column::new(name.into(), vec![Some(s.clone()); height]),
        _ => Column::new(name.into(), vec![None::<f64>; height]),
    }
}

impl DropConstant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.kept = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn dropped(&self) -> Vec<String> {
        self.constants.iter().map(|c| c.name.clone()).collect()
    }
}

impl FrameTransform for DropConstant {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        let mut constants = Vec::new();
        for (position, column) in df.get_columns().iter().enumerate() {
            if is_temporal(column.dtype()) || self.kept.iter().any(|k| k == column.name().as_str()) {
                continue;
            }
            if let Some(value) = constant_value(column)? {
                constants.push(ConstantColumn {
                    position,
                    name: column.name().to_string(),
                    value,
                });
            }
        }
        self.constants = constants;
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        drop_columns(df, &self.dropped())
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let mut out = df.clone();
        let present = column_names(df);
        for constant in &self.constants {
            if present.contains(&constant.name) {
                continue;
            }
            let column = repeat_column(&constant.name, &constant.value, out.height());
            let position = constant.position.min(out.width());
            out.insert_column(position, column)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_and_restore() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0],
            "k" => &[5.0, 5.0, 5.0],
            "b" => &[Some(1.0), None, Some(1.0)],
        )
        .unwrap();
        let mut step = DropConstant::new();
        let dropped = step.fit_transform(&df).unwrap();
        assert_eq!(column_names(&dropped), vec!["a", "b"]);
        assert_eq!(step.dropped(), vec!["k"]);

        let restored = step.inverse_transform(&dropped).unwrap();
        assert_eq!(column_names(&restored), vec!["a", "k", "b"]);
        assert_eq!(
            crate::utils::frame::column_f64(&restored, "k").unwrap(),
            vec![Some(5.0); 3]
        );
    }

    #[test]
    fn test_kept_constant_stays() {
        let df = df!("y" => &[5.0, 5.0, 5.0], "k" => &[1.0, 1.0, 1.0]).unwrap();
        let mut step = DropConstant::new().keeping(["y"]);
        let out = step.fit_transform(&df).unwrap();
        assert_eq!(column_names(&out), vec!["y"]);
        assert_eq!(step.dropped(), vec!["k"]);
    }

    #[test]
    fn test_text_constant() {
        let df = df!("s" => &["x", "x"], "v" => &[1, 2]).unwrap();
        let mut step = DropConstant::new();
        step.fit(&df).unwrap();
        assert_eq!(step.dropped(), vec!["s"]);
    }
}
