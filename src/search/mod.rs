//! Strategy search over the static catalog

pub mod catalog;

pub use catalog::{CatalogEntry, CATALOG};

use crate::error::Result;
use crate::specification::{
    ModelSpecification, PipelineSpecification, PreprocessSpecification, ProblemSpecification,
};
use serde_json::Map;
use tracing::debug;

/// Candidate pipelines for one problem, computed once at construction.
///
/// Matching entries keep their catalog order. Forecasting problems with
/// cross-sections get every match wrapped in a cross-sectional pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchManager {
    problem: ProblemSpecification,
    keywords: Vec<String>,
    candidates: Vec<PipelineSpecification>,
}

impl SearchManager {
    pub fn new(problem: ProblemSpecification) -> Result<Self> {
        let keywords = problem.keywords();
        let wrap = problem.is_forecasting() && !problem.cross_sections().is_empty();

        let candidates = CATALOG
            .iter()
            .filter(|entry| entry.matches(&keywords))
            .map(|entry| {
                if wrap {
                    Ok(PipelineSpecification {
                        preprocess: Some(PreprocessSpecification::Enabled(false)),
                        model: ModelSpecification {
                            library: "cross-sectional".to_string(),
                            strategy: serde_json::to_value(entry)?,
                            hyperparameters: Map::new(),
                        },
                    })
                } else {
                    Ok(entry.pipeline())
                }
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(keywords = ?keywords, candidates = candidates.len(), "searched strategy catalog");
        Ok(Self {
            problem,
            keywords,
            candidates,
        })
    }

    pub fn problem(&self) -> &ProblemSpecification {
        &self.problem
    }

    /// Keywords every candidate had to carry
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn candidates(&self) -> &[PipelineSpecification] {
        &self.candidates
    }

    /// A fresh pass over the candidates, from the first
    pub fn iter(&self) -> std::slice::Iter<'_, PipelineSpecification> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl<'a> IntoIterator for &'a SearchManager {
    type Item = &'a PipelineSpecification;
    type IntoIter = std::slice::Iter<'a, PipelineSpecification>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// First catalog entry proposing `strategy`
pub fn find_pipeline(strategy: &str) -> Option<&'static CatalogEntry> {
    CATALOG
        .iter()
        .find(|entry| entry.model.strategy.as_str() == Some(strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::keywords;
    use serde_json::json;

    fn forecasting(targets: &[&str]) -> ProblemSpecification {
        ProblemSpecification::builder()
            .targets(targets.iter().copied())
            .forecasting(true)
            .ordering("t")
            .build()
    }

    #[test]
    fn test_univariate_forecasting_candidates() {
        let search = SearchManager::new(forecasting(&["y"])).unwrap();
        let strategies: Vec<&str> = search
            .iter()
            .map(|p| p.model.strategy_name().unwrap())
            .collect();
        assert_eq!(&strategies[..4], &["BASELINE_REGRESSOR", "BASELINE_REGRESSOR", "BASELINE_REGRESSOR", "SARIMAX"]);
        assert!(!strategies.contains(&"VAR"));
        for entry in CATALOG.iter().filter(|e| e.matches(search.keywords())) {
            assert!(entry.keywords.contains(&keywords::UNIVARIATE.to_string()));
        }
    }

    #[test]
    fn test_multivariate_excludes_sarimax() {
        let search = SearchManager::new(forecasting(&["y", "z"])).unwrap();
        assert!(search.iter().all(|p| p.model.strategy_name().unwrap() != "SARIMAX"));
        assert!(search.iter().any(|p| p.model.strategy_name().unwrap() == "VAR"));
    }

    #[test]
    fn test_cross_sections_wrap_candidates() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .cross_sections(["region"])
            .forecasting(true)
            .ordering("t")
            .build();
        let search = SearchManager::new(problem).unwrap();
        assert!(!search.is_empty());
        for pipeline in &search {
            assert_eq!(pipeline.model.library, "cross-sectional");
            assert!(pipeline.preprocess_config().is_none());
            assert!(pipeline.model.inner_pipeline().is_ok());
        }
    }

    #[test]
    fn test_user_keywords_can_empty_the_result() {
        let problem = ProblemSpecification::builder()
            .targets(["y"])
            .predictors(["x"])
            .keywords(["TEXT"])
            .build();
        assert!(SearchManager::new(problem).unwrap().is_empty());
    }

    #[test]
    fn test_find_pipeline() {
        let entry = find_pipeline("RANDOM_FOREST").unwrap();
        assert_eq!(entry.model.hyperparameters["n_estimators"], json!(10));
        assert!(find_pipeline("SUPPORT_VECTOR_REGRESSION").is_none());
    }
}
