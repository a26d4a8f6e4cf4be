//! Pipeline composition and execution for mask filtering.

mod runner;

pub use runner::{Pipeline, PipelineConfig, PipelineOutput, PipelineStep};
