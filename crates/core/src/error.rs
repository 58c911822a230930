//! Error types for graph construction and pipeline execution.

use crate::types::{PipelineId, RunId, StepId};

/// Errors raised while building or walking a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A dependency map key names a step that is not part of the step list.
    #[error("step {0} referenced in dependencies but not defined")]
    UnknownStep(StepId),

    /// A dependency references a step that does not exist.
    #[error("dependency {dependency} not found for step {step}")]
    DependencyNotFound { step: StepId, dependency: StepId },

    #[error("cycle detected in pipeline graph")]
    CycleDetected,

    /// Topological sort emitted fewer nodes than the graph holds.
    #[error("topological sort incomplete: sorted {sorted} of {total} steps")]
    IncompleteSort { sorted: usize, total: usize },

    #[error("step {0} not found in graph")]
    StepNotFound(StepId),
}

/// Errors surfaced by the pipeline manager and run coordinator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(PipelineId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("pipeline {0} has no steps")]
    NoSteps(PipelineId),

    #[error("pipeline contains unreachable steps: reached {reachable} of {total}")]
    Unreachable { reachable: usize, total: usize },

    #[error("invalid pipeline: {0}")]
    Graph(#[from] GraphError),

    /// A single step's tool invocation failed.
    #[error("step {step} failed: {message}")]
    NodeExecution { step: StepId, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
