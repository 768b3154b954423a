//! Decision tree implementation

use super::params::{opt_usize_param, str_param, usize_param};
use super::{argmax_rows, n_classes, TabularBackend};
use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf holding the mean target (regression) or class frequencies
    Leaf { value: Vec<f64>, n_samples: usize },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn leaf_for(&self, sample: ArrayView1<f64>) -> &[f64] {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Gini,
    Entropy,
    Mse,
}

impl Criterion {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "gini" => Ok(Criterion::Gini),
            "entropy" => Ok(Criterion::Entropy),
            "mse" | "squared_error" => Ok(Criterion::Mse),
            other => Err(SolverError::invalid(format!("unknown criterion: {}", other))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Criterion::Gini => "gini",
            Criterion::Entropy => "entropy",
            Criterion::Mse => "squared_error",
        }
    }
}

/// Running statistics of one side of a candidate split
#[derive(Clone)]
struct SideStats {
    count: usize,
    sum: f64,
    sq_sum: f64,
    class_counts: Vec<usize>,
}

impl SideStats {
    fn new(n_classes: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sq_sum: 0.0,
            class_counts: vec![0; n_classes],
        }
    }

    fn add(&mut self, y: f64, sign: i64) {
        if sign > 0 {
            self.count += 1;
            self.sum += y;
            self.sq_sum += y * y;
        } else {
            self.count -= 1;
            self.sum -= y;
            self.sq_sum -= y * y;
        }
        if let Some(c) = self.class_counts.get_mut(y as usize) {
            if sign > 0 {
                *c += 1;
            } else {
                *c -= 1;
            }
        }
    }

    fn impurity(&self, criterion: Criterion) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        match criterion {
            Criterion::Gini => {
                1.0 - self
                    .class_counts
                    .iter()
                    .map(|&c| (c as f64 / n).powi(2))
                    .sum::<f64>()
            }
            Criterion::Entropy => -self
                .class_counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.ln()
                })
                .sum::<f64>(),
            Criterion::Mse => (self.sq_sum / n - (self.sum / n).powi(2)).max(0.0),
        }
    }
}

/// CART decision tree for classification (labels `0..k`) or regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; all when `None`
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
    is_classification: bool,
    n_classes: usize,
}

impl DecisionTree {
    pub fn new_classifier() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            random_state: None,
            is_classification: true,
            n_classes: 0,
        }
    }

    pub fn new_regressor() -> Self {
        Self {
            criterion: Criterion::Mse,
            is_classification: false,
            ..Self::new_classifier()
        }
    }

    pub fn from_params(params: &Map<String, Value>, classification: bool) -> Result<Self> {
        let mut tree = if classification {
            Self::new_classifier()
        } else {
            Self::new_regressor()
        };
        tree.max_depth = opt_usize_param(params, "max_depth")?;
        tree.min_samples_split = usize_param(params, "min_samples_split", 2)?.max(2);
        tree.min_samples_leaf = usize_param(params, "min_samples_leaf", 1)?.max(1);
        if classification {
            tree.criterion = Criterion::parse(&str_param(params, "criterion", "gini")?)?;
            if tree.criterion == Criterion::Mse {
                return Err(SolverError::invalid("classification trees take gini or entropy"));
            }
        }
        Ok(tree)
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_min_samples(mut self, split: usize, leaf: usize) -> Self {
        self.min_samples_split = split.max(2);
        self.min_samples_leaf = leaf.max(1);
        self
    }

    /// Fit with a declared class count, so leaves of trees grown on
    /// subsamples share one layout.
    pub fn fit_with_classes(&mut self, x: &Array2<f64>, y: &Array1<f64>, n_classes: usize) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(SolverError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(SolverError::DataError("cannot fit a tree on zero rows".to_string()));
        }
        self.n_classes = if self.is_classification { n_classes } else { 0 };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.random_state.unwrap_or(0));
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.root = Some(self.build(x, y, indices, 0, &mut rng));
        Ok(())
    }

    fn leaf(&self, y: &Array1<f64>, indices: &[usize]) -> TreeNode {
        let n = indices.len();
        let value = if self.is_classification {
            let mut counts = vec![0.0; self.n_classes];
            for &i in indices {
                if let Some(c) = counts.get_mut(y[i] as usize) {
                    *c += 1.0;
                }
            }
            counts.iter().map(|c| c / n.max(1) as f64).collect()
        } else {
            vec![indices.iter().map(|&i| y[i]).sum::<f64>() / n.max(1) as f64]
        };
        TreeNode::Leaf { value, n_samples: n }
    }

    fn build(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        depth: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> TreeNode {
        let first = y[indices[0]];
        let pure = indices.iter().all(|&i| (y[i] - first).abs() < 1e-12);
        let stop = pure
            || indices.len() < self.min_samples_split
            || indices.len() < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d);
        if stop {
            return self.leaf(y, &indices);
        }

        let Some((feature_idx, threshold)) = self.best_split(x, y, &indices, rng) else {
            return self.leaf(y, &indices);
        };
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, feature_idx]] <= threshold);

        TreeNode::Split {
            feature_idx,
            threshold,
            left: Box::new(self.build(x, y, left, depth + 1, rng)),
            right: Box::new(self.build(x, y, right, depth + 1, rng)),
        }
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        rng: &mut Xoshiro256PlusPlus,
    ) -> Option<(usize, f64)> {
        let mut features: Vec<usize> = (0..x.ncols()).collect();
        if let Some(k) = self.max_features.filter(|&k| k < features.len()) {
            features.shuffle(rng);
            features.truncate(k.max(1));
        }

        let mut parent = SideStats::new(self.n_classes);
        for &i in indices {
            parent.add(y[i], 1);
        }
        let parent_impurity = parent.impurity(self.criterion);
        let n = indices.len() as f64;

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in features {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut left = SideStats::new(self.n_classes);
            let mut right = parent.clone();
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                left.add(y[i], 1);
                right.add(y[i], -1);

                let (here, next) = (x[[i, feature]], x[[sorted[pos + 1], feature]]);
                if here == next
                    || left.count < self.min_samples_leaf
                    || right.count < self.min_samples_leaf
                {
                    continue;
                }
                let weighted = (left.count as f64 * left.impurity(self.criterion)
                    + right.count as f64 * right.impurity(self.criterion))
                    / n;
                let gain = parent_impurity - weighted;
                if gain > 1e-12 && best.map_or(true, |b| gain > b.2) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }

    /// Leaf values per row: one column for regression, class frequencies otherwise
    pub fn leaf_values(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let root = self.root.as_ref().ok_or(SolverError::ModelNotFitted)?;
        let width = if self.is_classification { self.n_classes } else { 1 };
        let mut out = Array2::zeros((x.nrows(), width));
        for (r, sample) in x.rows().into_iter().enumerate() {
            for (c, v) in root.leaf_for(sample).iter().enumerate() {
                out[[r, c]] = *v;
            }
        }
        Ok(out)
    }

    fn shared_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("max_depth".into(), json!(self.max_depth));
        params.insert("min_samples_split".into(), json!(self.min_samples_split));
        params.insert("min_samples_leaf".into(), json!(self.min_samples_leaf));
        params.insert("criterion".into(), json!(self.criterion.as_str()));
        params
    }
}

impl TabularBackend for DecisionTree {
    fn name(&self) -> &'static str {
        if self.is_classification {
            "DecisionTreeClassifier"
        } else {
            "DecisionTreeRegressor"
        }
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _sample_weight: Option<&Array1<f64>>) -> Result<()> {
        let classes = if self.is_classification { n_classes(y) } else { 0 };
        self.fit_with_classes(x, y, classes)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let values = self.leaf_values(x)?;
        if self.is_classification {
            Ok(argmax_rows(&values))
        } else {
            Ok(values.column(0).to_owned())
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_classification {
            return Err(SolverError::unsupported(self.name(), "predict_proba"));
        }
        self.leaf_values(x)
    }

    fn get_params(&self) -> Map<String, Value> {
        self.shared_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classifier_fits_training_data() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [8.0, 1.0], [9.0, 1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y, None).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
        let proba = tree.predict_proba(&array![[1.5, 0.0]]).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_regressor_depth_one_averages() {
        let x = array![[0.0], [1.0], [10.0], [11.0]];
        let y = array![1.0, 3.0, 10.0, 12.0];
        let mut tree = DecisionTree::new_regressor().with_max_depth(Some(1));
        tree.fit(&x, &y, None).unwrap();
        let pred = tree.predict(&array![[0.5], [10.5]]).unwrap();
        assert_eq!(pred.to_vec(), vec![2.0, 11.0]);
        assert!(tree.predict_proba(&x).is_err());
    }

    #[test]
    fn test_bad_criterion() {
        let params = json!({"criterion": "squared_error"});
        assert!(DecisionTree::from_params(params.as_object().unwrap(), true).is_err());
    }
}
