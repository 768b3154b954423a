//! Integration test: Strategy search over problem specifications

use raven_solver::search::CATALOG;
use raven_solver::{find_pipeline, ProblemSpecification, SearchManager};

fn forecasting_problem() -> ProblemSpecification {
    ProblemSpecification::builder()
        .targets(["y"])
        .forecasting(true)
        .ordering("t")
        .build()
}

fn classification_problem() -> ProblemSpecification {
    ProblemSpecification::from_json(
        r#"{
            "targets": ["label"],
            "predictors": ["a", "b"],
            "categorical": ["label"]
        }"#,
    )
    .unwrap()
}

#[test]
fn test_search_is_deterministic() {
    let first = SearchManager::new(forecasting_problem()).unwrap();
    let second = SearchManager::new(forecasting_problem()).unwrap();
    assert_eq!(first.candidates(), second.candidates(), "same problem, same candidates");

    let passes: Vec<Vec<_>> = (0..2).map(|_| first.iter().cloned().collect()).collect();
    assert_eq!(passes[0], passes[1], "every pass restarts from the first candidate");
}

#[test]
fn test_every_candidate_covers_problem_keywords() {
    for problem in [forecasting_problem(), classification_problem()] {
        let search = SearchManager::new(problem).unwrap();
        assert!(!search.is_empty());
        let matching = CATALOG.iter().filter(|e| e.matches(search.keywords())).count();
        assert_eq!(search.len(), matching, "no matching entry is skipped");
        for entry in CATALOG.iter().filter(|e| e.matches(search.keywords())) {
            for keyword in search.keywords() {
                assert!(entry.keywords.contains(keyword));
            }
        }
    }
}

#[test]
fn test_forecasting_candidates_are_tagged() {
    let search = SearchManager::new(forecasting_problem()).unwrap();
    let keywords = search.keywords().to_vec();
    assert!(keywords.contains(&"FORECASTING".to_string()));
    assert!(keywords.contains(&"UNIVARIATE".to_string()));
    assert!(search
        .iter()
        .all(|p| p.preprocess_config().map_or(false, |c| c.resample)));
}

#[test]
fn test_unmatched_keyword_yields_nothing() {
    let problem = ProblemSpecification::builder()
        .targets(["y"])
        .predictors(["x"])
        .keywords(["AUDIO"])
        .build();
    let search = SearchManager::new(problem).unwrap();
    assert!(search.is_empty());
    assert_eq!(search.iter().count(), 0);
}

#[test]
fn test_cross_sectional_forecasting_wraps_candidates() {
    let problem = ProblemSpecification::builder()
        .targets(["sales"])
        .cross_sections(["store"])
        .forecasting(true)
        .ordering("date")
        .build();
    let search = SearchManager::new(problem).unwrap();
    let plain = SearchManager::new(forecasting_problem()).unwrap();
    assert_eq!(search.len(), plain.len());

    for (wrapped, inner) in search.iter().zip(plain.iter()) {
        assert_eq!(wrapped.model.library, "cross-sectional");
        assert!(wrapped.preprocess_config().is_none(), "outer preprocessing is disabled");
        let unwrapped = wrapped.model.inner_pipeline().unwrap();
        assert_eq!(&unwrapped, inner);
    }
}

#[test]
fn test_find_pipeline_returns_first_match() {
    let entry = find_pipeline("BASELINE_REGRESSOR").unwrap();
    assert_eq!(entry.model.hyperparameters["method"], "MEAN");
    assert!(find_pipeline("NOT_A_STRATEGY").is_none());
}
