//! Integration test: Per-partition forecasting over cross-sections

use polars::prelude::*;
use raven_solver::utils::frame::{column_f64, column_names, column_str};
use raven_solver::{Library, ProblemSpecification, SearchManager, Solution, TrainSpecification};

fn problem() -> ProblemSpecification {
    ProblemSpecification::builder()
        .targets(["y"])
        .cross_sections(["region"])
        .forecasting(true)
        .ordering("t")
        .build()
}

fn regional_df() -> DataFrame {
    let dates = ["2020-01-01", "2020-01-02", "2020-01-03", "2020-01-04"];
    let t: Vec<&str> = dates.iter().chain(dates.iter()).copied().collect();
    df!(
        "t" => t,
        "region" => &["A", "A", "A", "A", "B", "B", "B", "B"],
        "y" => &[1.0, 2.0, 3.0, 2.0, 10.0, 20.0, 30.0, 20.0],
    )
    .unwrap()
}

fn fitted_solution() -> Solution {
    let search = SearchManager::new(problem()).unwrap();
    let pipeline = search.iter().next().cloned().unwrap();
    let mut solution = Solution::new(pipeline, TrainSpecification::new(problem())).unwrap();
    solution.fit(Some(regional_df())).unwrap();
    solution
}

#[test]
fn test_fits_one_model_per_region() {
    let solution = fitted_solution();
    assert_eq!(solution.estimator().library(), Library::CrossSectional);
    assert!(solution.is_fitted());
}

#[test]
fn test_predicts_known_regions_only() {
    let solution = fitted_solution();
    let test = df!(
        "t" => &["2020-01-05", "2020-01-05", "2020-01-05"],
        "region" => &["A", "B", "C"],
    )
    .unwrap();

    let out = solution.predict(&test).unwrap();
    assert_eq!(out.height(), 2, "unseen region C is dropped");
    let regions = column_str(&out, "region").unwrap();
    assert_eq!(regions, vec![Some("A".to_string()), Some("B".to_string())]);

    let y = column_f64(&out, "y").unwrap();
    assert!((y[0].unwrap() - 2.0).abs() < 1e-6, "region A mean");
    assert!((y[1].unwrap() - 20.0).abs() < 1e-6, "region B mean");
}

#[test]
fn test_all_unseen_regions_give_empty_frame() {
    let solution = fitted_solution();
    let test = df!("t" => &["2020-01-05"], "region" => &["Z"]).unwrap();
    let out = solution.predict(&test).unwrap();
    assert_eq!(out.height(), 0);
    assert!(column_names(&out).contains(&"region".to_string()));
    assert!(column_names(&out).contains(&"y".to_string()));
}
