//! Conversions between polars frames and plain vectors / ndarray matrices.

use crate::error::{Result, SolverError};
use ndarray::Array2;
use polars::prelude::*;

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Numeric or boolean storage
pub fn is_numeric(dtype: &DataType) -> bool {
    is_integral(dtype)
        || matches!(dtype, DataType::Float32 | DataType::Float64 | DataType::Boolean)
}

pub fn is_integral(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

pub fn is_temporal(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Datetime(_, _) | DataType::Date)
}

fn get<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| SolverError::FeatureNotFound(name.to_string()))
}

/// Column values as nullable floats; non-numeric text becomes null.
pub fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let casted = get(df, name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

pub fn column_i64(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let casted = get(df, name)?.cast(&DataType::Int64)?;
    Ok(casted.i64()?.into_iter().collect())
}

pub fn column_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let casted = get(df, name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Milliseconds since the epoch for a `Date` or `Datetime` column.
pub fn column_datetime_ms(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = get(df, name)?;
    if !is_temporal(column.dtype()) {
        return Err(SolverError::DataError(format!(
            "column {} is not a datetime column",
            name
        )));
    }
    let casted = column
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    Ok(casted.i64()?.into_iter().collect())
}

/// Build a millisecond-precision datetime column
pub fn datetime_column(name: &str, values: Vec<Option<i64>>) -> Result<Column> {
    Ok(Column::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

pub fn f64_column(name: &str, values: Vec<Option<f64>>) -> Column {
    Column::new(name.into(), values)
}

pub fn str_column(name: &str, values: Vec<Option<String>>) -> Column {
    Column::new(name.into(), values)
}

/// Select the named columns that exist, in the order given.
pub fn select_existing(df: &DataFrame, names: &[String]) -> Result<DataFrame> {
    let present: Vec<Column> = names
        .iter()
        .filter_map(|n| df.column(n).ok().cloned())
        .collect();
    frame_from_columns(present)
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&i| i as IdxSize).collect());
    Ok(df.take(&idx)?)
}

pub fn frame_from_columns(columns: Vec<Column>) -> Result<DataFrame> {
    Ok(DataFrame::new(columns)?)
}

/// Append (or replace) columns on a copy of `df`.
pub fn with_columns(df: &DataFrame, columns: Vec<Column>) -> Result<DataFrame> {
    let mut out = df.clone();
    for column in columns {
        out.with_column(column)?;
    }
    Ok(out)
}

pub fn drop_columns(df: &DataFrame, names: &[String]) -> Result<DataFrame> {
    let mut out = df.clone();
    for name in names {
        if has_column(&out, name) {
            out = out.drop(name)?;
        }
    }
    Ok(out)
}

/// Extract named columns into a row-major matrix; nulls become 0.0.
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|name| {
            Ok(column_f64(df, name)?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    Ok(Array2::from_shape_fn((n_rows, col_names.len()), |(r, c)| col_data[c][r]))
}

/// One float column per matrix column; NaN becomes null.
pub fn array2_to_columns(names: &[String], values: &Array2<f64>) -> Vec<Column> {
    names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let col: Vec<Option<f64>> = values
                .column(j)
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(v) })
                .collect();
            f64_column(name, col)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_to_array2() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0],
            "b" => &[4i64, 5, 6],
        )
        .unwrap();
        let x = columns_to_array2(&df, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        assert_eq!(x[[0, 0]], 4.0);
        assert_eq!(x[[2, 1]], 3.0);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let col = datetime_column("t", vec![Some(0), Some(86_400_000), None]).unwrap();
        let df = DataFrame::new(vec![col]).unwrap();
        assert!(is_temporal(df.column("t").unwrap().dtype()));
        assert_eq!(
            column_datetime_ms(&df, "t").unwrap(),
            vec![Some(0), Some(86_400_000), None]
        );
    }

    #[test]
    fn test_select_existing_skips_missing() {
        let df = df!("a" => &[1, 2], "b" => &[3, 4]).unwrap();
        let out = select_existing(&df, &["b".into(), "zz".into(), "a".into()]).unwrap();
        assert_eq!(column_names(&out), vec!["b", "a"]);
    }

    #[test]
    fn test_missing_column_is_feature_not_found() {
        let df = df!("a" => &[1, 2]).unwrap();
        assert!(matches!(
            column_f64(&df, "nope"),
            Err(SolverError::FeatureNotFound(_))
        ));
    }
}
