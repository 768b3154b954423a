//! Random Forest implementation

use super::decision_tree::DecisionTree;
use super::params::{opt_u64_param, opt_usize_param, usize_param};
use super::{argmax_rows, n_classes, TabularBackend};
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Bagged ensemble of randomized decision trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
    is_classification: bool,
    n_classes: usize,
}

impl RandomForest {
    pub fn new_classifier(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators: n_estimators.max(1),
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            random_state: None,
            is_classification: true,
            n_classes: 0,
        }
    }

    pub fn new_regressor(n_estimators: usize) -> Self {
        Self {
            is_classification: false,
            ..Self::new_classifier(n_estimators)
        }
    }

    pub fn from_params(params: &Map<String, Value>, classification: bool) -> Result<Self> {
        let n_estimators = usize_param(params, "n_estimators", 100)?;
        if n_estimators == 0 {
            return Err(SolverError::invalid("n_estimators must be positive"));
        }
        let mut forest = if classification {
            Self::new_classifier(n_estimators)
        } else {
            Self::new_regressor(n_estimators)
        };
        forest.max_depth = opt_usize_param(params, "max_depth")?;
        forest.min_samples_split = usize_param(params, "min_samples_split", 2)?;
        forest.min_samples_leaf = usize_param(params, "min_samples_leaf", 1)?;
        forest.random_state = opt_u64_param(params, "random_state")?;
        if let Some(bootstrap) = params.get("bootstrap").and_then(Value::as_bool) {
            forest.bootstrap = bootstrap;
        }
        Ok(forest)
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    fn max_features(&self, n_features: usize) -> usize {
        if self.is_classification {
            ((n_features as f64).sqrt() as usize).max(1)
        } else {
            n_features
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Average of per-tree leaf values
    fn averaged(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.trees.is_empty() {
            return Err(SolverError::ModelNotFitted);
        }
        let per_tree: Vec<Array2<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.leaf_values(x))
            .collect::<Result<_>>()?;
        let mut total = Array2::zeros(per_tree[0].raw_dim());
        for values in &per_tree {
            total += values;
        }
        Ok(total / per_tree.len() as f64)
    }
}

impl TabularBackend for RandomForest {
    fn name(&self) -> &'static str {
        if self.is_classification {
            "RandomForestClassifier"
        } else {
            "RandomForestRegressor"
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _sample_weight: Option<&Array1<f64>>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(SolverError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(SolverError::DataError("cannot fit a forest on zero rows".to_string()));
        }
        self.n_classes = if self.is_classification { n_classes(y) } else { 0 };

        let n_samples = x.nrows();
        let max_features = self.max_features(x.ncols());
        let mut rng = match self.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| rng.next_u64()).collect();

        let trees: Vec<DecisionTree> = seeds
            .into_par_iter()
            .map(|seed| {
                let mut tree_rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                let (xs, ys) = if self.bootstrap {
                    let rows: Vec<usize> = (0..n_samples)
                        .map(|_| tree_rng.gen_range(0..n_samples))
                        .collect();
                    (x.select(Axis(0), &rows), y.select(Axis(0), &rows))
                } else {
                    (x.clone(), y.clone())
                };
                let base = if self.is_classification {
                    DecisionTree::new_classifier()
                } else {
                    DecisionTree::new_regressor()
                };
                let mut tree = base
                    .with_max_depth(self.max_depth)
                    .with_min_samples(self.min_samples_split, self.min_samples_leaf)
                    .with_max_features(Some(max_features))
                    .with_random_state(tree_rng.next_u64());
                tree.fit_with_classes(&xs, &ys, self.n_classes)?;
                Ok(tree)
            })
            .collect::<Result<_>>()?;

        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let averaged = self.averaged(x)?;
        if self.is_classification {
            Ok(argmax_rows(&averaged))
        } else {
            Ok(averaged.column(0).to_owned())
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_classification {
            return Err(SolverError::unsupported(self.name(), "predict_proba"));
        }
        self.averaged(x)
    }

    fn get_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("n_estimators".into(), json!(self.n_estimators));
        params.insert("max_depth".into(), json!(self.max_depth));
        params.insert("min_samples_split".into(), json!(self.min_samples_split));
        params.insert("min_samples_leaf".into(), json!(self.min_samples_leaf));
        params.insert("bootstrap".into(), json!(self.bootstrap));
        params.insert("random_state".into(), json!(self.random_state));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Array2<f64>, Array1<f64>) {
        let mut x = Array2::zeros((40, 2));
        let mut y = Array1::zeros(40);
        for i in 0..40 {
            let offset = if i < 20 { 0.0 } else { 10.0 };
            x[[i, 0]] = offset + (i % 5) as f64 * 0.1;
            x[[i, 1]] = offset - (i % 3) as f64 * 0.1;
            y[i] = if i < 20 { 0.0 } else { 1.0 };
        }
        (x, y)
    }

    #[test]
    fn test_classifier() {
        let (x, y) = two_blobs();
        let mut forest = RandomForest::new_classifier(10).with_random_state(7);
        forest.fit(&x, &y, None).unwrap();
        assert_eq!(forest.n_trees(), 10);
        assert_eq!(forest.predict(&x).unwrap(), y);

        let proba = forest.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seeded_forests_agree() {
        let (x, y) = two_blobs();
        let y = y.mapv(|v| v * 3.0 + 1.0);
        let mut a = RandomForest::new_regressor(5).with_random_state(11);
        let mut b = RandomForest::new_regressor(5).with_random_state(11);
        a.fit(&x, &y, None).unwrap();
        b.fit(&x, &y, None).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_unfitted() {
        let forest = RandomForest::new_regressor(3);
        assert!(matches!(
            forest.predict(&Array2::zeros((1, 1))),
            Err(SolverError::ModelNotFitted)
        ));
    }
}
