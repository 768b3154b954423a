//! Cadence and date-format inference for time orderings.

use super::date_offset::DateOffset;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// Most triplets inspected when inferring a cadence
const MAX_TRIPLETS: usize = 100;

/// Formats tried, in order, when no date format is declared.
const CANDIDATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m/%d/%y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %Y",
    "%B %Y",
    "%Y-%m",
    "%Y/%m",
    "%Y",
];

/// Parse one value with a strptime-style format. Formats without a day or
/// month field resolve to the first day / first month.
pub fn parse_with_format(value: &str, format: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, format) {
        return d.and_hms_opt(0, 0, 0);
    }

    let has_day = ["%d", "%e", "%j"].iter().any(|s| format.contains(s));
    let has_month = ["%m", "%b", "%B", "%h", "%j"].iter().any(|s| format.contains(s));
    if has_day && has_month {
        return None;
    }
    let mut padded_value = value.to_string();
    let mut padded_format = format.to_string();
    if !has_month {
        padded_value.push_str(" 01");
        padded_format.push_str(" %m");
    }
    if !has_day {
        padded_value.push_str(" 01");
        padded_format.push_str(" %d");
    }
    NaiveDate::parse_from_str(&padded_value, &padded_format)
        .ok()?
        .and_hms_opt(0, 0, 0)
}

/// First candidate format that parses every value.
pub fn infer_date_format<S: AsRef<str>>(values: &[S]) -> Option<String> {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.as_ref().trim())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return None;
    }
    CANDIDATE_FORMATS
        .iter()
        .find(|fmt| values.iter().all(|v| parse_with_format(v, fmt).is_some()))
        .map(|fmt| fmt.to_string())
}

fn to_naive(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

fn is_month_end(dt: &NaiveDateTime) -> bool {
    dt.date().succ_opt().map_or(false, |next| next.month() != dt.month())
}

fn months_between(a: &NaiveDateTime, b: &NaiveDateTime) -> i64 {
    (b.year() as i64 - a.year() as i64) * 12 + (b.month() as i64 - a.month() as i64)
}

/// Regular cadence of three sorted instants, if they are evenly spaced
/// either in calendar months or in fixed time.
pub fn infer_triplet_offset(a: i64, b: i64, c: i64) -> Option<DateOffset> {
    let (na, nb, nc) = (to_naive(a)?, to_naive(b)?, to_naive(c)?);

    let same_time = na.time() == nb.time() && nb.time() == nc.time();
    let m1 = months_between(&na, &nb);
    let m2 = months_between(&nb, &nc);
    if same_time && m1 > 0 && m1 == m2 {
        let same_day = na.day() == nb.day() && nb.day() == nc.day();
        let all_month_end = is_month_end(&na) && is_month_end(&nb) && is_month_end(&nc);
        if same_day || all_month_end {
            return Some(DateOffset::months(m1));
        }
    }

    let d1 = b - a;
    let d2 = c - b;
    if d1 > 0 && d1 == d2 {
        return Some(DateOffset::millis(d1));
    }
    None
}

/// Shortest cadence observed over up to 100 evenly spaced triplets of a
/// sorted ordering. `None` when no triplet is regular.
pub fn min_frequency(sorted: &[i64]) -> Option<DateOffset> {
    if sorted.len() < 3 {
        return None;
    }
    let last_trio = sorted.len() - 3;
    let num_samples = (last_trio + 1).min(MAX_TRIPLETS);

    let mut candidates: Vec<DateOffset> = Vec::new();
    for i in linspace_indices(last_trio, num_samples) {
        if let Some(offset) = infer_triplet_offset(sorted[i], sorted[i + 1], sorted[i + 2]) {
            if !candidates.contains(&offset) {
                candidates.push(offset);
            }
        }
    }

    candidates.into_iter().min_by(|a, b| {
        a.approx_seconds()
            .partial_cmp(&b.approx_seconds())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Uniform cadence spreading the observed span over the row count
pub fn linear_cadence(sorted: &[i64]) -> Option<DateOffset> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    let millis = (last - first) / sorted.len() as i64;
    if millis <= 0 {
        return None;
    }
    Some(DateOffset::millis(millis))
}

fn linspace_indices(stop: usize, num: usize) -> Vec<usize> {
    match num {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..num)
            .map(|i| (i as f64 * stop as f64 / (num - 1) as f64).round() as usize)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::date_offset::MILLIS_PER_DAY;

    fn ms(y: i32, m: u32, d: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn test_infer_format() {
        assert_eq!(infer_date_format(&["2020-01-01", "2020-01-31"]).as_deref(), Some("%Y-%m-%d"));
        assert_eq!(infer_date_format(&["12/31/2020", "01/05/2021"]).as_deref(), Some("%m/%d/%Y"));
        assert_eq!(infer_date_format(&["31/12/2020"]).as_deref(), Some("%d/%m/%Y"));
        assert_eq!(infer_date_format(&["1999", "2000"]).as_deref(), Some("%Y"));
        assert_eq!(infer_date_format(&["not a date"]), None);
    }

    #[test]
    fn test_partial_formats_pad() {
        let dt = parse_with_format("2020-03", "%Y-%m").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
        let dt = parse_with_format("1984", "%Y").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(1984, 1, 1).unwrap());
    }

    #[test]
    fn test_daily_frequency() {
        let days: Vec<i64> = (0..30).map(|i| i * MILLIS_PER_DAY).collect();
        assert_eq!(min_frequency(&days), Some(DateOffset::days(1)));
    }

    #[test]
    fn test_monthly_frequency() {
        let months: Vec<i64> = (1..=9).map(|m| ms(2021, m, 1)).collect();
        assert_eq!(min_frequency(&months), Some(DateOffset::months(1)));
    }

    #[test]
    fn test_picks_shortest_candidate() {
        let mut ts: Vec<i64> = (0..10).map(|i| i * 2 * MILLIS_PER_DAY).collect();
        let last = *ts.last().unwrap();
        ts.extend((1..10).map(|i| last + i * MILLIS_PER_DAY));
        assert_eq!(min_frequency(&ts), Some(DateOffset::days(1)));
    }

    #[test]
    fn test_irregular_falls_back() {
        let ts = vec![0, 1_000, 5_000, 6_000, 20_000];
        assert_eq!(min_frequency(&ts), None);
        assert_eq!(linear_cadence(&ts), Some(DateOffset::millis(4_000)));
    }
}
