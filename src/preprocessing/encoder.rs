//! One-hot encoding of categorical columns

use super::FrameTransform;
use crate::error::{Result, SolverError};
use crate::utils::frame::{column_f64, column_str, drop_columns, f64_column, str_column};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EncodedColumn {
    name: String,
    levels: Vec<String>,
}

impl EncodedColumn {
    fn output_name(&self, level: &str) -> String {
        format!("{}_{}", self.name, level)
    }

    fn output_names(&self) -> Vec<String> {
        self.levels.iter().map(|l| self.output_name(l)).collect()
    }
}

/// Expands each categorical column into indicator columns `{column}_{level}`.
///
/// Only the `category_limit` most frequent levels are kept. Levels outside
/// that set, including ones never seen during fit, encode as all zeros and
/// decode as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    category_limit: usize,
    encoded: Vec<EncodedColumn>,
    is_fitted: bool,
}

/// Levels ordered by descending frequency; ties keep first appearance
fn top_levels(values: &[Option<String>], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, value) in values.iter().enumerate() {
        if let Some(v) = value {
            counts.entry(v.as_str()).or_insert((0, position)).0 += 1;
        }
    }
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(level, _)| level.to_string())
        .collect()
}

impl OneHotEncoder {
    pub fn new(category_limit: usize) -> Self {
        Self {
            category_limit,
            encoded: Vec::new(),
            is_fitted: false,
        }
    }

    /// Fit with levels counted on a frame other than the one being encoded
    /// (counts are taken before missing values are filled).
    pub fn fit_levels(&mut self, df: &DataFrame) -> Result<()> {
        self.encoded = df
            .get_column_names()
            .iter()
            .map(|name| {
                let values = column_str(df, name)?;
                Ok(EncodedColumn {
                    name: name.to_string(),
                    levels: top_levels(&values, self.category_limit),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.is_fitted = true;
        Ok(())
    }

    pub fn input_columns(&self) -> Vec<String> {
        self.encoded.iter().map(|e| e.name.clone()).collect()
    }

    pub fn output_columns(&self) -> Vec<String> {
        self.encoded.iter().flat_map(|e| e.output_names()).collect()
    }
}

impl FrameTransform for OneHotEncoder {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        self.fit_levels(df)
    }

    /// Replaces every fitted column present in `df` by its indicator columns,
    /// appended after the remaining columns.
    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let mut indicators = Vec::new();
        let mut consumed = Vec::new();
        for column in &self.encoded {
            if df.column(&column.name).is_err() {
                continue;
            }
            let values = column_str(df, &column.name)?;
            for level in &column.levels {
                let hot = values
                    .iter()
                    .map(|v| Some(if v.as_deref() == Some(level.as_str()) { 1.0 } else { 0.0 }))
                    .collect();
                indicators.push(f64_column(&column.output_name(level), hot));
            }
            consumed.push(column.name.clone());
        }

        let mut columns = drop_columns(df, &consumed)?.take_columns();
        columns.extend(indicators);
        Ok(DataFrame::new(columns)?)
    }

    /// Collapses indicator groups back into their original columns. The
    /// strongest positive indicator wins; all-zero rows become missing.
    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut decoded = Vec::new();
        let mut consumed = Vec::new();
        for column in &self.encoded {
            let names = column.output_names();
            if names.is_empty() || names.iter().any(|n| df.column(n).is_err()) {
                continue;
            }
            let indicators = names
                .iter()
                .map(|n| column_f64(df, n))
                .collect::<Result<Vec<_>>>()?;
            let labels = (0..df.height())
                .map(|row| {
                    let mut best: Option<(usize, f64)> = None;
                    for (j, values) in indicators.iter().enumerate() {
                        let v = values[row].unwrap_or(0.0);
                        if v > 0.0 && best.map_or(true, |(_, b)| v > b) {
                            best = Some((j, v));
                        }
                    }
                    best.map(|(j, _)| column.levels[j].clone())
                })
                .collect();
            decoded.push(str_column(&column.name, labels));
            consumed.extend(names);
        }

        let mut columns = drop_columns(df, &consumed)?.take_columns();
        columns.extend(decoded);
        Ok(DataFrame::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::frame::column_names;

    #[test]
    fn test_top_levels_order() {
        let values: Vec<Option<String>> = ["b", "a", "a", "c", "b", "a"]
            .iter()
            .map(|s| Some(s.to_string()))
            .collect();
        assert_eq!(top_levels(&values, 2), vec!["a", "b"]);
    }

    #[test]
    fn test_encode_unseen_level() {
        let train = df!("color" => &["red", "blue", "red"]).unwrap();
        let mut encoder = OneHotEncoder::new(20);
        let encoded = encoder.fit_transform(&train).unwrap();
        assert_eq!(column_names(&encoded), vec!["color_red", "color_blue"]);

        let test = df!("color" => &["green", "blue"]).unwrap();
        let encoded = encoder.transform(&test).unwrap();
        assert_eq!(column_f64(&encoded, "color_red").unwrap(), vec![Some(0.0), Some(0.0)]);
        assert_eq!(column_f64(&encoded, "color_blue").unwrap(), vec![Some(0.0), Some(1.0)]);

        let decoded = encoder.inverse_transform(&encoded).unwrap();
        assert_eq!(
            column_str(&decoded, "color").unwrap(),
            vec![None, Some("blue".to_string())]
        );
    }

    #[test]
    fn test_category_limit() {
        let train = df!("c" => &["x", "x", "y", "z"]).unwrap();
        let mut encoder = OneHotEncoder::new(1);
        encoder.fit(&train).unwrap();
        assert_eq!(encoder.output_columns(), vec!["c_x"]);
    }
}
