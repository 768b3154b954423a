//! Raven Solver - declarative problem search and model fitting
//!
//! Turns a declarative description of a prediction or forecasting problem
//! into fitted models without model-specific code.
//!
//! # Modules
//!
//! - [`specification`] - Problem, train and pipeline specifications
//! - [`search`] - Strategy catalog and keyword matching
//! - [`preprocessing`] - Invertible preprocessing and time-index resolution
//! - [`estimator`] - Uniform fit/predict/persist contract over model families
//! - [`models`] - Tabular and time-series backends
//! - [`solution`] - Preprocessor and estimator lifecycle
//! - [`cli`] - Command-line interface

pub mod error;

pub mod specification;
pub mod search;

pub mod preprocessing;
pub mod estimator;
pub mod models;
pub mod solution;

pub mod utils;
pub mod cli;

pub use error::{Result, SolverError};
pub use estimator::{Estimator, Library};
pub use preprocessing::{PreprocessConfig, ProblemData, ProblemPreprocessor, TemporalPreprocessor};
pub use search::{find_pipeline, SearchManager};
pub use solution::Solution;
pub use specification::{
    Dataset, ModelSpecification, PipelineSpecification, PreprocessSpecification, ProblemSpecification,
    TrainSpecification,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
