//! Typed reads from hyperparameter maps

use crate::error::{Result, SolverError};
use serde_json::{Map, Value};

fn wrong_type(key: &str, expected: &str, value: &Value) -> SolverError {
    SolverError::invalid(format!(
        "hyperparameter {} must be {}, got {}",
        key, expected, value
    ))
}

fn present<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

pub fn f64_param(params: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    match present(params, key) {
        None => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| wrong_type(key, "a number", v)),
    }
}

pub fn usize_param(params: &Map<String, Value>, key: &str, default: usize) -> Result<usize> {
    Ok(opt_usize_param(params, key)?.unwrap_or(default))
}

pub fn opt_usize_param(params: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| wrong_type(key, "a non-negative integer", v)),
    }
}

pub fn opt_u64_param(params: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(key, "a non-negative integer", v)),
    }
}

pub fn bool_param(params: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match present(params, key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| wrong_type(key, "a boolean", v)),
    }
}

pub fn str_param(params: &Map<String, Value>, key: &str, default: &str) -> Result<String> {
    match present(params, key) {
        None => Ok(default.to_string()),
        Some(v) => v
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| wrong_type(key, "a string", v)),
    }
}

/// An integer or a list of integers
pub fn usize_list_param(params: &Map<String, Value>, key: &str) -> Result<Option<Vec<usize>>> {
    match present(params, key) {
        None => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| wrong_type(key, "a list of non-negative integers", v))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(v) => v
            .as_u64()
            .map(|n| Some(vec![n as usize]))
            .ok_or_else(|| wrong_type(key, "an integer or a list of integers", v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_reads() {
        let params = json!({"alpha": 0.5, "n": 3, "flag": true, "lags": [1, 2], "none": null});
        let params = params.as_object().unwrap();
        assert_eq!(f64_param(params, "alpha", 1.0).unwrap(), 0.5);
        assert_eq!(f64_param(params, "missing", 1.0).unwrap(), 1.0);
        assert_eq!(usize_param(params, "n", 0).unwrap(), 3);
        assert_eq!(opt_usize_param(params, "none").unwrap(), None);
        assert!(bool_param(params, "flag", false).unwrap());
        assert_eq!(usize_list_param(params, "lags").unwrap(), Some(vec![1, 2]));
        assert_eq!(usize_list_param(params, "n").unwrap(), Some(vec![3]));
        assert!(matches!(
            usize_param(params, "alpha", 0),
            Err(SolverError::InvalidSpecification(_))
        ));
    }
}
