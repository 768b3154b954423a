//! Declarative inputs: problems, training sessions and pipelines

pub mod pipeline;
pub mod problem;
pub mod train;

pub use pipeline::{ModelSpecification, PipelineSpecification, PreprocessSpecification};
pub use problem::{
    keywords, ForecastingHorizon, ProblemSpecification, ProblemSpecificationBuilder, TaskType,
    TimeGranularity, DEFAULT_INDEX,
};
pub use train::{Dataset, TrainSpecification, INPUT_DATASET};
