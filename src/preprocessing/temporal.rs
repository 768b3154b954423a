//! Time-ordering normalization for forecasting problems.
//!
//! The ordering column is resolved into millisecond datetimes, moved to the
//! front of the frame and sorted. Three resolution modes exist:
//!
//! * the column is absent: rows are numbered `0..n` and treated as offsets
//! * the column is integral (or an offset unit is declared): value `i` maps to
//!   `date_offset_start + i * unit`
//! * otherwise the column is parsed with a declared or inferred date format
//!
//! Columns that already carry a datetime type are used as-is in every mode.

use super::date_offset::DateOffset;
use super::frequency::{infer_date_format, linear_cadence, min_frequency, parse_with_format};
use super::FrameTransform;
use crate::error::{Result, SolverError};
use crate::specification::ProblemSpecification;
use crate::utils::frame::{
    column_datetime_ms, column_f64, column_i64, column_str, datetime_column, drop_columns,
    f64_column, has_column, is_integral, is_numeric, is_temporal, take_rows,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on the rows a resample may produce
const MAX_GRID_POINTS: usize = 10_000_000;

fn parse_start(start: Option<&str>, date_format: Option<&str>) -> Result<i64> {
    let Some(start) = start else {
        return Ok(0);
    };
    let format = match date_format {
        Some(f) => f.to_string(),
        None => infer_date_format(&[start]).ok_or_else(|| {
            SolverError::invalid(format!("unable to infer the format of date_offset_start {:?}", start))
        })?,
    };
    parse_with_format(start, &format)
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| {
            SolverError::invalid(format!(
                "date_offset_start {:?} does not match format {}",
                start, format
            ))
        })
}

/// Resolve the ordering column of `df` into a sorted datetime column placed first.
pub fn format_date_index(
    df: &DataFrame,
    order_column: &str,
    date_format: Option<&str>,
    date_offset_unit: Option<DateOffset>,
    date_offset_start: Option<&str>,
) -> Result<DataFrame> {
    let ordering: Vec<Option<i64>> = if !has_column(df, order_column) {
        let unit = date_offset_unit.unwrap_or(DateOffset::seconds(1));
        let start = parse_start(date_offset_start, date_format)?;
        (0..df.height() as i64)
            .map(|i| unit.apply(start, i).map(Some))
            .collect::<Result<_>>()?
    } else {
        let dtype = df.column(order_column)?.dtype().clone();
        if is_temporal(&dtype) {
            column_datetime_ms(df, order_column)?
        } else if let Some(unit) = date_offset_unit {
            if !is_integral(&dtype) {
                return Err(SolverError::invalid(format!(
                    "ordering column {} must be integral when a date offset unit is given",
                    order_column
                )));
            }
            let start = parse_start(date_offset_start, date_format)?;
            column_i64(df, order_column)?
                .into_iter()
                .map(|v| v.map(|k| unit.apply(start, k)).transpose())
                .collect::<Result<_>>()?
        } else {
            let format = date_format.ok_or_else(|| {
                SolverError::invalid(format!(
                    "date_format must be known to parse ordering column {}",
                    order_column
                ))
            })?;
            column_str(df, order_column)?
                .into_iter()
                .map(|v| match v {
                    None => Ok(None),
                    Some(s) => parse_with_format(&s, format)
                        .map(|dt| Some(dt.and_utc().timestamp_millis()))
                        .ok_or_else(|| {
                            SolverError::DataError(format!(
                                "cannot parse {:?} in {} with format {}",
                                s, order_column, format
                            ))
                        }),
                })
                .collect::<Result<_>>()?
        }
    };

    let mut rows: Vec<usize> = (0..ordering.len()).collect();
    rows.sort_by_key(|&i| (ordering[i].is_none(), ordering[i]));

    let sorted: Vec<Option<i64>> = rows.iter().map(|&i| ordering[i]).collect();
    let rest = take_rows(&drop_columns(df, &[order_column.to_string()])?, &rows)?;

    let mut columns = vec![datetime_column(order_column, sorted)?];
    columns.extend(rest.take_columns());
    Ok(DataFrame::new(columns)?)
}

/// Linear interpolation in time over sorted `(timestamp, value)` points.
/// Repeats the last value past the end; missing before the start.
fn interpolate_at(points: &[(i64, f64)], t: i64) -> Option<f64> {
    match points.binary_search_by_key(&t, |p| p.0) {
        Ok(i) => Some(points[i].1),
        Err(0) => None,
        Err(i) if i == points.len() => points.last().map(|p| p.1),
        Err(i) => {
            let (t0, v0) = points[i - 1];
            let (t1, v1) = points[i];
            Some(v0 + (v1 - v0) * (t - t0) as f64 / (t1 - t0) as f64)
        }
    }
}

/// Regularize a time-sorted frame onto a fixed cadence.
///
/// Rows sharing a timestamp are averaged; the regular grid starts at the
/// first timestamp and is filled by time-weighted linear interpolation.
/// Non-numeric columns cannot be averaged and are dropped.
pub fn resample_date_index(df: &DataFrame, order_column: &str, unit: DateOffset) -> Result<DataFrame> {
    if unit.is_zero() {
        return Err(SolverError::invalid("resample cadence must be non-zero"));
    }
    let timestamps = column_datetime_ms(df, order_column)?;

    let mut groups: Vec<(i64, Vec<usize>)> = Vec::new();
    for (row, t) in timestamps.iter().enumerate() {
        let Some(t) = *t else { continue };
        match groups.last_mut() {
            Some((last, rows)) if *last == t => rows.push(row),
            _ => groups.push((t, vec![row])),
        }
    }
    let (Some(first), Some(last)) = (groups.first().map(|g| g.0), groups.last().map(|g| g.0)) else {
        return Ok(df.clone());
    };

    let mut grid = Vec::new();
    loop {
        let t = unit.apply(first, grid.len() as i64)?;
        if t > last {
            break;
        }
        if grid.len() >= MAX_GRID_POINTS {
            return Err(SolverError::ComputationError(format!(
                "resampling at {} produces more than {} rows",
                unit, MAX_GRID_POINTS
            )));
        }
        grid.push(t);
    }

    let mut columns = vec![datetime_column(order_column, grid.iter().map(|&t| Some(t)).collect())?];
    for column in df.get_columns() {
        let name = column.name().to_string();
        if name == order_column {
            continue;
        }
        if !is_numeric(column.dtype()) {
            debug!(column = %name, "dropping non-numeric column while resampling");
            continue;
        }
        let values = column_f64(df, &name)?;
        let points: Vec<(i64, f64)> = groups
            .iter()
            .filter_map(|(t, rows)| {
                let present: Vec<f64> = rows.iter().filter_map(|&r| values[r]).collect();
                if present.is_empty() {
                    None
                } else {
                    Some((*t, present.iter().sum::<f64>() / present.len() as f64))
                }
            })
            .collect();
        let resampled = grid.iter().map(|&t| interpolate_at(&points, t)).collect();
        columns.push(f64_column(&name, resampled));
    }
    Ok(DataFrame::new(columns)?)
}

/// Fitted temporal parameters plus the date resolution and resampling steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPreprocessor {
    pub order_column: String,
    pub indexes: Vec<String>,
    pub date_format: Option<String>,
    pub input_date_offset_unit: Option<DateOffset>,
    pub date_offset_start: Option<String>,
    pub resample: bool,
    pub resample_date_offset_unit: Option<DateOffset>,
    /// Last observed instant, epoch milliseconds
    pub date_offset_end: Option<i64>,
    /// Cadence observed in the fit data
    pub observed_date_offset: Option<DateOffset>,
    is_fitted: bool,
}

impl TemporalPreprocessor {
    pub fn new(order_column: impl Into<String>) -> Self {
        Self {
            order_column: order_column.into(),
            indexes: Vec::new(),
            date_format: None,
            input_date_offset_unit: None,
            date_offset_start: None,
            resample: false,
            resample_date_offset_unit: None,
            date_offset_end: None,
            observed_date_offset: None,
            is_fitted: false,
        }
    }

    /// Parameters declared by a forecasting problem for its ordering column
    pub fn from_problem(problem: &ProblemSpecification, resample: bool) -> Result<Self> {
        let order_column = problem
            .ordering()?
            .ok_or_else(|| SolverError::invalid("temporal preprocessing requires a forecasting problem"))?;
        let mut temporal = Self::new(order_column.clone());
        temporal.indexes = problem.indexes();
        temporal.date_format = problem.date_format(&order_column).map(str::to_string);
        temporal.date_offset_start = problem.date_offset_start(&order_column).map(str::to_string);
        temporal.input_date_offset_unit = problem.date_offset_unit(&order_column)?;
        temporal.resample = resample;
        temporal.resample_date_offset_unit = problem.resample_date_offset_unit()?;
        Ok(temporal)
    }

    pub fn with_resample(mut self, unit: Option<DateOffset>) -> Self {
        self.resample = true;
        self.resample_date_offset_unit = unit;
        self
    }

    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = Some(format.to_string());
        self
    }

    pub fn with_date_offset(mut self, unit: DateOffset, start: Option<&str>) -> Self {
        self.input_date_offset_unit = Some(unit);
        self.date_offset_start = start.map(str::to_string);
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Cadence future rows are generated at
    pub fn cadence(&self) -> Option<DateOffset> {
        self.resample_date_offset_unit
            .filter(|_| self.resample)
            .or(self.input_date_offset_unit)
            .or(self.observed_date_offset)
    }

    /// Resolve only the ordering column, with the fitted parameters
    pub fn format(&self, df: &DataFrame) -> Result<DataFrame> {
        format_date_index(
            df,
            &self.order_column,
            self.date_format.as_deref(),
            self.input_date_offset_unit,
            self.date_offset_start.as_deref(),
        )
    }

    /// `steps` instants following the last fitted observation
    pub fn future_index(&self, steps: usize) -> Result<Vec<i64>> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let end = self
            .date_offset_end
            .ok_or_else(|| SolverError::DataError("no observations were fitted".to_string()))?;
        let cadence = self
            .cadence()
            .ok_or_else(|| SolverError::DataError("observation cadence is unknown".to_string()))?;
        (1..=steps as i64).map(|k| cadence.apply(end, k)).collect()
    }
}

impl FrameTransform for TemporalPreprocessor {
    fn fit(&mut self, df: &DataFrame) -> Result<()> {
        if !has_column(df, &self.order_column) {
            self.input_date_offset_unit.get_or_insert(DateOffset::seconds(1));
        } else if self.input_date_offset_unit.is_none() {
            let dtype = df.column(&self.order_column)?.dtype().clone();
            if is_integral(&dtype) && self.date_format.is_none() {
                self.input_date_offset_unit = Some(DateOffset::seconds(1));
            } else if !is_temporal(&dtype) && self.date_format.is_none() {
                let values: Vec<String> = column_str(df, &self.order_column)?
                    .into_iter()
                    .flatten()
                    .collect();
                let inferred = infer_date_format(&values).ok_or_else(|| {
                    SolverError::invalid(format!(
                        "unable to infer a date format for ordering column {}",
                        self.order_column
                    ))
                })?;
                debug!(column = %self.order_column, format = %inferred, "inferred date format");
                self.date_format = Some(inferred);
            }
        }

        let formatted = self.format(df)?;
        let instants: Vec<i64> = column_datetime_ms(&formatted, &self.order_column)?
            .into_iter()
            .flatten()
            .collect();
        self.date_offset_end = instants.last().copied();
        self.observed_date_offset = min_frequency(&instants).or_else(|| linear_cadence(&instants));

        let offset_mode = self.input_date_offset_unit.is_some();
        if self.resample && self.resample_date_offset_unit.is_none() && !offset_mode {
            self.resample_date_offset_unit = self.observed_date_offset;
        }
        debug!(
            column = %self.order_column,
            offset_mode,
            cadence = ?self.observed_date_offset,
            "fitted temporal preprocessor"
        );
        self.is_fitted = true;
        Ok(())
    }

    fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(SolverError::ModelNotFitted);
        }
        let mut formatted = self.format(df)?;
        if self.resample {
            let unit = self
                .resample_date_offset_unit
                .or(self.input_date_offset_unit)
                .or(self.observed_date_offset)
                .ok_or_else(|| SolverError::DataError("resample cadence is unknown".to_string()))?;
            if !self.indexes.is_empty() && Some(unit) != self.input_date_offset_unit {
                let droppable: Vec<String> = self
                    .indexes
                    .iter()
                    .filter(|i| **i != self.order_column)
                    .cloned()
                    .collect();
                formatted = drop_columns(&formatted, &droppable)?;
            }
            formatted = resample_date_index(&formatted, &self.order_column, unit)?;
        }
        Ok(formatted)
    }

    fn inverse_transform(&self, df: &DataFrame) -> Result<DataFrame> {
        Ok(df.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::date_offset::MILLIS_PER_DAY;
    use crate::utils::frame::column_names;
    use chrono::NaiveDate;

    fn ms(y: i32, m: u32, d: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn test_integer_offsets_from_start() {
        let df = df!("t" => &[2i64, 0, 1], "y" => &[3.0, 1.0, 2.0]).unwrap();
        let mut temporal = TemporalPreprocessor::new("t").with_date_offset(DateOffset::days(1), Some("2020-01-01"));
        let out = temporal.fit_transform(&df).unwrap();
        assert_eq!(
            column_datetime_ms(&out, "t").unwrap(),
            vec![Some(ms(2020, 1, 1)), Some(ms(2020, 1, 2)), Some(ms(2020, 1, 3))]
        );
        assert_eq!(column_f64(&out, "y").unwrap(), vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(temporal.date_offset_end, Some(ms(2020, 1, 3)));
    }

    #[test]
    fn test_missing_order_column_numbers_rows() {
        let df = df!("y" => &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut temporal = TemporalPreprocessor::new("t");
        let out = temporal.fit_transform(&df).unwrap();
        assert_eq!(column_names(&out), vec!["t", "y"]);
        assert_eq!(column_datetime_ms(&out, "t").unwrap()[3], Some(3_000));
        assert_eq!(temporal.input_date_offset_unit, Some(DateOffset::seconds(1)));
    }

    #[test]
    fn test_infers_format_and_cadence() {
        let df = df!(
            "date" => &["2021-01-04", "2021-01-01", "2021-01-02", "2021-01-03", "2021-01-05"],
            "y" => &[4.0, 1.0, 2.0, 3.0, 5.0],
        )
        .unwrap();
        let mut temporal = TemporalPreprocessor::new("date");
        temporal.fit(&df).unwrap();
        assert_eq!(temporal.date_format.as_deref(), Some("%Y-%m-%d"));
        assert_eq!(temporal.observed_date_offset, Some(DateOffset::days(1)));
        assert_eq!(temporal.future_index(2).unwrap(), vec![ms(2021, 1, 6), ms(2021, 1, 7)]);
    }

    #[test]
    fn test_resample_fills_gaps() {
        let df = df!(
            "date" => &["2021-01-01", "2021-01-02", "2021-01-02", "2021-01-05"],
            "y" => &[0.0, 1.0, 3.0, 8.0],
            "label" => &["a", "b", "c", "d"],
        )
        .unwrap();
        let mut temporal = TemporalPreprocessor::new("date").with_resample(Some(DateOffset::days(1)));
        let out = temporal.fit_transform(&df).unwrap();
        assert_eq!(out.height(), 5);
        assert!(!column_names(&out).contains(&"label".to_string()));
        let y = column_f64(&out, "y").unwrap();
        assert_eq!(y[1], Some(2.0));
        assert_eq!(y[2], Some(4.0));
        assert_eq!(y[4], Some(8.0));
    }

    #[test]
    fn test_datetime_column_used_directly() {
        let t = datetime_column("t", vec![Some(MILLIS_PER_DAY), Some(0)]).unwrap();
        let df = DataFrame::new(vec![t, Column::new("y".into(), &[2.0, 1.0])]).unwrap();
        let mut temporal = TemporalPreprocessor::new("t").with_date_offset(DateOffset::days(1), None);
        let out = temporal.fit_transform(&df).unwrap();
        assert_eq!(column_datetime_ms(&out, "t").unwrap(), vec![Some(0), Some(MILLIS_PER_DAY)]);
    }

    #[test]
    fn test_non_integral_offset_column_is_invalid() {
        let df = df!("t" => &["a", "b"]).unwrap();
        let mut temporal = TemporalPreprocessor::new("t").with_date_offset(DateOffset::days(1), None);
        assert!(matches!(temporal.fit(&df), Err(SolverError::InvalidSpecification(_))));
    }
}
