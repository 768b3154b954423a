//! Calendar-aware time offsets.
//!
//! A [`DateOffset`] combines a calendar part (months) with a fixed part
//! (milliseconds). Applying an offset `k` times from a start instant first
//! moves the calendar by `k * months` and then adds `k * millis`, so
//! `{"months": 1, "days": 1}` applied once to 1970-01-01 lands on 1970-02-02.

use crate::error::{Result, SolverError};
use chrono::{DateTime, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::Mul;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_DAY: i64 = 86_400_000;
/// Mean Gregorian month, used only to rank offsets by duration
const APPROX_SECONDS_PER_MONTH: f64 = 2_629_746.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateOffset {
    pub months: i64,
    pub millis: i64,
}

impl DateOffset {
    pub fn months(months: i64) -> Self {
        Self { months, millis: 0 }
    }

    pub fn millis(millis: i64) -> Self {
        Self { months: 0, millis }
    }

    pub fn seconds(seconds: i64) -> Self {
        Self::millis(seconds * MILLIS_PER_SECOND)
    }

    pub fn days(days: i64) -> Self {
        Self::millis(days * MILLIS_PER_DAY)
    }

    /// Offset of `n` units, where `unit` is a name such as `"days"` or `"month"`.
    pub fn from_unit(unit: &str, n: f64) -> Result<Self> {
        let unit = unit.trim().to_lowercase();
        let unit = unit.strip_suffix('s').unwrap_or(&unit);

        let calendar_months = match unit {
            "year" => Some(12),
            "quarter" => Some(3),
            "month" => Some(1),
            _ => None,
        };
        if let Some(per_unit) = calendar_months {
            if n.fract() != 0.0 {
                return Err(SolverError::invalid(format!(
                    "calendar offset must be integral, got {} {}s",
                    n, unit
                )));
            }
            return Ok(Self::months(n as i64 * per_unit));
        }

        let per_unit_millis = match unit {
            "week" => 7.0 * MILLIS_PER_DAY as f64,
            "day" => MILLIS_PER_DAY as f64,
            "hour" => 3_600_000.0,
            "minute" => 60_000.0,
            "second" => 1_000.0,
            "milli" | "millisecond" => 1.0,
            "microsecond" => 1e-3,
            "nanosecond" => 1e-6,
            other => {
                return Err(SolverError::invalid(format!(
                    "unrecognized date offset unit: {}",
                    other
                )))
            }
        };
        Ok(Self::millis((n * per_unit_millis).round() as i64))
    }

    /// Build an offset from a unit name (`"seconds"`), a map of units
    /// (`{"months": 3, "years": 1}`) or a previously serialized offset.
    pub fn standardize(value: &Value) -> Result<Self> {
        match value {
            Value::String(unit) => Self::from_unit(unit, 1.0),
            Value::Object(units) => {
                let mut offset = Self::default();
                for (unit, n) in units {
                    let n = n.as_f64().ok_or_else(|| {
                        SolverError::invalid(format!("date offset {} must be numeric", unit))
                    })?;
                    offset = offset + Self::from_unit(unit, n)?;
                }
                Ok(offset)
            }
            other => Err(SolverError::invalid(format!(
                "date offset must be a unit name or a map of units, got {}",
                other
            ))),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.millis == 0
    }

    /// Apply the offset `k` times to an instant in epoch milliseconds.
    pub fn apply(&self, start_ms: i64, k: i64) -> Result<i64> {
        let start = DateTime::from_timestamp_millis(start_ms)
            .ok_or_else(|| SolverError::ComputationError(format!("timestamp out of range: {}", start_ms)))?
            .naive_utc();

        let overflow = || SolverError::ComputationError(format!("offset {:?} times {} overflows", self, k));
        let months = self.months.checked_mul(k).ok_or_else(overflow)?;
        let millis = self.millis.checked_mul(k).ok_or_else(overflow)?;
        let shifted = shift_months(start, months)?;
        shifted
            .and_utc()
            .timestamp_millis()
            .checked_add(millis)
            .ok_or_else(overflow)
    }

    /// Rough duration, used to pick the shortest of several candidate cadences
    pub fn approx_seconds(&self) -> f64 {
        self.months as f64 * APPROX_SECONDS_PER_MONTH + self.millis as f64 / 1_000.0
    }
}

fn shift_months(start: NaiveDateTime, months: i64) -> Result<NaiveDateTime> {
    let magnitude = u32::try_from(months.unsigned_abs())
        .map_err(|_| SolverError::ComputationError(format!("month offset too large: {}", months)))?;
    let shifted = if months >= 0 {
        start.checked_add_months(Months::new(magnitude))
    } else {
        start.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or_else(|| SolverError::ComputationError("date arithmetic overflow".to_string()))
}

impl std::ops::Add for DateOffset {
    type Output = DateOffset;

    fn add(self, other: DateOffset) -> DateOffset {
        DateOffset {
            months: self.months + other.months,
            millis: self.millis + other.millis,
        }
    }
}

impl Mul<i64> for DateOffset {
    type Output = DateOffset;

    fn mul(self, k: i64) -> DateOffset {
        DateOffset {
            months: self.months * k,
            millis: self.millis * k,
        }
    }
}

impl fmt::Display for DateOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.months, self.millis) {
            (0, ms) if ms % MILLIS_PER_DAY == 0 => write!(f, "{}D", ms / MILLIS_PER_DAY),
            (0, ms) if ms % MILLIS_PER_SECOND == 0 => write!(f, "{}S", ms / MILLIS_PER_SECOND),
            (0, ms) => write!(f, "{}ms", ms),
            (m, 0) => write!(f, "{}MS", m),
            (m, ms) => write!(f, "{}MS+{}ms", m, ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ms(y: i32, m: u32, d: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn test_standardize_forms() {
        assert_eq!(DateOffset::standardize(&json!("days")).unwrap(), DateOffset::days(1));
        assert_eq!(
            DateOffset::standardize(&json!({"years": 1, "months": 3})).unwrap(),
            DateOffset::months(15)
        );
        let built = DateOffset { months: 2, millis: 5 };
        let value = serde_json::to_value(built).unwrap();
        assert_eq!(DateOffset::standardize(&value).unwrap(), built);
        assert!(DateOffset::standardize(&json!(3)).is_err());
        assert!(DateOffset::standardize(&json!("fortnights")).is_err());
    }

    #[test]
    fn test_month_then_day() {
        let offset = DateOffset::standardize(&json!({"days": 1, "months": 1})).unwrap();
        assert_eq!(offset.apply(0, 0).unwrap(), ms(1970, 1, 1));
        assert_eq!(offset.apply(0, 1).unwrap(), ms(1970, 2, 2));
    }

    #[test]
    fn test_month_end_clamps_from_start() {
        let offset = DateOffset::months(1);
        let start = ms(2021, 1, 31);
        assert_eq!(offset.apply(start, 1).unwrap(), ms(2021, 2, 28));
        assert_eq!(offset.apply(start, 2).unwrap(), ms(2021, 3, 31));
    }

    #[test]
    fn test_large_step_counts_overflow_as_errors() {
        let year = DateOffset::months(12);
        assert!(matches!(year.apply(0, i64::MAX / 2), Err(SolverError::ComputationError(_))));
        let week = DateOffset::days(7);
        assert!(matches!(week.apply(0, i64::MAX / 1_000), Err(SolverError::ComputationError(_))));
        assert!(week.apply(0, 52).is_ok());
    }

    #[test]
    fn test_scale_and_rank() {
        let day = DateOffset::days(1);
        assert_eq!(day * 7, DateOffset::from_unit("week", 1.0).unwrap());
        assert!(DateOffset::months(1).approx_seconds() > (day * 28).approx_seconds());
    }
}
