//! Registration tables: which library identifiers exist, which strategies
//! each library serves, the hyperparameter keys every strategy accepts and
//! the capabilities it declares.

use crate::error::{Result, SolverError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// Closed set of estimator families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Library {
    Tabular,
    TimeSeries,
    CrossSectional,
}

struct LibraryRegistration {
    library: Library,
    /// Canonical identifier first, then accepted aliases
    names: &'static [&'static str],
}

static LIBRARIES: &[LibraryRegistration] = &[
    LibraryRegistration {
        library: Library::Tabular,
        names: &["tabular", "sklearn"],
    },
    LibraryRegistration {
        library: Library::TimeSeries,
        names: &["time-series", "statsmodels"],
    },
    LibraryRegistration {
        library: Library::CrossSectional,
        names: &["cross-sectional"],
    },
];

impl Library {
    pub fn from_name(name: &str) -> Result<Self> {
        LIBRARIES
            .iter()
            .find(|r| r.names.contains(&name))
            .map(|r| r.library)
            .ok_or_else(|| SolverError::invalid(format!("unknown library: {}", name)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Library::Tabular => "tabular",
            Library::TimeSeries => "time-series",
            Library::CrossSectional => "cross-sectional",
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a strategy declares at registration time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub classification: bool,
    pub predict_proba: bool,
    pub decision_function: bool,
    pub fitted_values: bool,
    /// Usable on forecasting problems, predicting from the time index alone
    pub forecasting: bool,
    pub exogenous: bool,
    pub sample_weight: bool,
}

const REGRESSOR: Capabilities = Capabilities {
    classification: false,
    predict_proba: false,
    decision_function: false,
    fitted_values: false,
    forecasting: false,
    exogenous: false,
    sample_weight: false,
};

const WEIGHTED_REGRESSOR: Capabilities = Capabilities {
    sample_weight: true,
    ..REGRESSOR
};

const CLASSIFIER: Capabilities = Capabilities {
    classification: true,
    predict_proba: true,
    ..REGRESSOR
};

const FORECASTER: Capabilities = Capabilities {
    fitted_values: true,
    forecasting: true,
    ..REGRESSOR
};

#[derive(Debug, Clone, Copy)]
pub struct StrategyRegistration {
    pub strategy: &'static str,
    pub library: Library,
    pub accepted_keys: &'static [&'static str],
    pub capabilities: Capabilities,
}

impl StrategyRegistration {
    /// Keep only the hyperparameters this strategy accepts
    pub fn filter_params(&self, hyperparameters: &Map<String, Value>) -> Map<String, Value> {
        let mut accepted = Map::new();
        for (key, value) in hyperparameters {
            if self.accepted_keys.contains(&key.as_str()) {
                accepted.insert(key.clone(), value.clone());
            } else {
                debug!(strategy = self.strategy, key = %key, "ignoring hyperparameter");
            }
        }
        accepted
    }

    pub fn require(&self, supported: bool, capability: &str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(SolverError::unsupported(self.strategy, capability))
        }
    }
}

const TREE_KEYS: &[&str] = &["max_depth", "min_samples_split", "min_samples_leaf", "criterion"];
const FOREST_KEYS: &[&str] = &[
    "n_estimators",
    "max_depth",
    "min_samples_split",
    "min_samples_leaf",
    "bootstrap",
    "random_state",
];
const NEIGHBOR_KEYS: &[&str] = &["n_neighbors", "weights", "metric"];

static STRATEGIES: &[StrategyRegistration] = &[
    StrategyRegistration {
        strategy: "ORDINARY_LEAST_SQUARES",
        library: Library::Tabular,
        accepted_keys: &["fit_intercept"],
        capabilities: WEIGHTED_REGRESSOR,
    },
    StrategyRegistration {
        strategy: "RIDGE_REGRESSION",
        library: Library::Tabular,
        accepted_keys: &["alpha", "fit_intercept"],
        capabilities: WEIGHTED_REGRESSOR,
    },
    StrategyRegistration {
        strategy: "LASSO_REGRESSION",
        library: Library::Tabular,
        accepted_keys: &["alpha", "fit_intercept", "max_iter", "tol"],
        capabilities: REGRESSOR,
    },
    StrategyRegistration {
        strategy: "ELASTIC_NET",
        library: Library::Tabular,
        accepted_keys: &["alpha", "l1_ratio", "fit_intercept", "max_iter", "tol"],
        capabilities: REGRESSOR,
    },
    StrategyRegistration {
        strategy: "RANDOM_FOREST_REGRESSOR",
        library: Library::Tabular,
        accepted_keys: FOREST_KEYS,
        capabilities: REGRESSOR,
    },
    StrategyRegistration {
        strategy: "K_NEIGHBORS_REGRESSOR",
        library: Library::Tabular,
        accepted_keys: NEIGHBOR_KEYS,
        capabilities: REGRESSOR,
    },
    StrategyRegistration {
        strategy: "DECISION_TREE_REGRESSOR",
        library: Library::Tabular,
        accepted_keys: TREE_KEYS,
        capabilities: REGRESSOR,
    },
    StrategyRegistration {
        strategy: "LOGISTIC_REGRESSION",
        library: Library::Tabular,
        accepted_keys: &["C", "max_iter", "tol", "fit_intercept"],
        capabilities: CLASSIFIER,
    },
    StrategyRegistration {
        strategy: "RANDOM_FOREST",
        library: Library::Tabular,
        accepted_keys: FOREST_KEYS,
        capabilities: CLASSIFIER,
    },
    StrategyRegistration {
        strategy: "RIDGE_CLASSIFIER",
        library: Library::Tabular,
        accepted_keys: &["alpha", "fit_intercept"],
        capabilities: Capabilities {
            predict_proba: false,
            decision_function: true,
            sample_weight: true,
            ..CLASSIFIER
        },
    },
    StrategyRegistration {
        strategy: "K_NEIGHBORS_CLASSIFIER",
        library: Library::Tabular,
        accepted_keys: NEIGHBOR_KEYS,
        capabilities: CLASSIFIER,
    },
    StrategyRegistration {
        strategy: "DECISION_TREE_CLASSIFIER",
        library: Library::Tabular,
        accepted_keys: TREE_KEYS,
        capabilities: CLASSIFIER,
    },
    StrategyRegistration {
        strategy: "GAUSSIAN_NAIVE_BAYES",
        library: Library::Tabular,
        accepted_keys: &["var_smoothing"],
        capabilities: Capabilities {
            sample_weight: true,
            ..CLASSIFIER
        },
    },
    StrategyRegistration {
        strategy: "BASELINE_REGRESSOR",
        library: Library::Tabular,
        accepted_keys: &["method"],
        capabilities: Capabilities {
            sample_weight: true,
            ..FORECASTER
        },
    },
    StrategyRegistration {
        strategy: "AR",
        library: Library::TimeSeries,
        accepted_keys: &["lags", "trend"],
        capabilities: Capabilities {
            exogenous: true,
            ..FORECASTER
        },
    },
    StrategyRegistration {
        strategy: "VAR",
        library: Library::TimeSeries,
        accepted_keys: &["maxlags", "trend"],
        capabilities: FORECASTER,
    },
    StrategyRegistration {
        strategy: "SARIMAX",
        library: Library::TimeSeries,
        accepted_keys: &["order", "seasonal_order", "trend"],
        capabilities: Capabilities {
            exogenous: true,
            ..FORECASTER
        },
    },
];

/// Registration of `strategy` within `library`
pub fn registration(library: Library, strategy: &str) -> Result<&'static StrategyRegistration> {
    STRATEGIES
        .iter()
        .find(|r| r.library == library && r.strategy == strategy)
        .ok_or_else(|| {
            SolverError::invalid(format!(
                "strategy {} is not registered for library {}",
                strategy, library
            ))
        })
}

/// Every registered strategy, in registration order
pub fn strategies() -> &'static [StrategyRegistration] {
    STRATEGIES
}
