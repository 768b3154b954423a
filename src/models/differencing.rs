//! Integer-order differencing for integrated models

use crate::error::{Result, SolverError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Differencer that remembers the last value at every level, so forecasts
/// made on the differenced scale can be integrated back and future
/// regressors can be differenced as a continuation of the fitted sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Differencer {
    order: usize,
    /// Last value of the series at each differencing level `0..order`
    tails: Option<Vec<f64>>,
}

impl Differencer {
    pub fn new(order: usize) -> Self {
        Self { order, tails: None }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Difference `order` times; the result is `order` values shorter
    pub fn transform(&mut self, series: &Array1<f64>) -> Result<Array1<f64>> {
        if series.len() <= self.order {
            return Err(SolverError::DataError(format!(
                "differencing of order {} needs more than {} observations",
                self.order,
                series.len()
            )));
        }
        let mut result = series.clone();
        let mut tails = Vec::with_capacity(self.order);
        for _ in 0..self.order {
            tails.push(result[result.len() - 1]);
            result = diff_once(&result);
        }
        self.tails = Some(tails);
        Ok(result)
    }

    fn fitted_tails(&self) -> Result<&[f64]> {
        self.tails
            .as_deref()
            .ok_or_else(|| SolverError::ComputationError("differencer not fitted".to_string()))
    }

    /// Difference values that directly follow the fitted sample; the
    /// output has the same length as the input.
    pub fn continue_transform(&self, future: &Array1<f64>) -> Result<Array1<f64>> {
        let tails = self.fitted_tails()?;
        let mut result = future.clone();
        for &tail in tails {
            let mut extended = Array1::zeros(result.len() + 1);
            extended[0] = tail;
            extended.slice_mut(ndarray::s![1..]).assign(&result);
            result = diff_once(&extended);
        }
        Ok(result)
    }

    /// Integrate differenced values that follow the fitted sample back to
    /// the original scale.
    pub fn integrate(&self, diffs: &Array1<f64>) -> Result<Array1<f64>> {
        let tails = self.fitted_tails()?;
        let mut result = diffs.clone();
        for &tail in tails.iter().rev() {
            result = cumsum(&result, tail);
        }
        Ok(result)
    }
}

fn diff_once(series: &Array1<f64>) -> Array1<f64> {
    let n = series.len();
    if n <= 1 {
        return Array1::zeros(0);
    }
    Array1::from_iter((1..n).map(|i| series[i] - series[i - 1]))
}

/// Running sum starting after `init`, excluding `init` itself
fn cumsum(series: &Array1<f64>, init: f64) -> Array1<f64> {
    let mut acc = init;
    series
        .iter()
        .map(|&v| {
            acc += v;
            acc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_first_difference() {
        let mut diff = Differencer::new(1);
        let diffed = diff.transform(&array![1.0, 3.0, 6.0, 10.0, 15.0]).unwrap();
        assert_eq!(diffed.to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        // next values 21, 28 have differences 6, 7
        assert_eq!(diff.integrate(&array![6.0, 7.0]).unwrap().to_vec(), vec![21.0, 28.0]);
        assert_eq!(diff.continue_transform(&array![21.0, 28.0]).unwrap().to_vec(), vec![6.0, 7.0]);
    }

    #[test]
    fn test_second_difference_integrates_quadratic() {
        let series: Array1<f64> = (0..6).map(|t| (t * t) as f64).collect();
        let mut diff = Differencer::new(2);
        let diffed = diff.transform(&series).unwrap();
        assert!(diffed.iter().all(|&d| (d - 2.0).abs() < 1e-12));
        let next = diff.integrate(&array![2.0, 2.0]).unwrap();
        assert_eq!(next.to_vec(), vec![36.0, 49.0]);
    }

    #[test]
    fn test_zero_order_is_identity() {
        let mut diff = Differencer::new(0);
        let series = array![1.0, 2.0];
        assert_eq!(diff.transform(&series).unwrap(), series);
        assert_eq!(diff.integrate(&array![5.0]).unwrap().to_vec(), vec![5.0]);
    }

    #[test]
    fn test_short_series() {
        assert!(Differencer::new(2).transform(&array![1.0, 2.0]).is_err());
    }
}
