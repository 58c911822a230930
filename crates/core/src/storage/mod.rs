pub mod index;
pub mod memory;

pub use index::RedbRunStore;
pub use memory::MemoryStore;

use crate::types::{DependencyMap, Pipeline, PipelineId, Run, RunId, Step, StepId, Tool, ToolId};
use anyhow::Result;

/// Pipelines, their steps, step dependencies and the tools steps invoke
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(&self, pipeline: Pipeline) -> Result<Pipeline>;

    async fn get_pipeline(&self, id: &PipelineId) -> Result<Option<Pipeline>>;

    /// Steps of a pipeline ordered by position
    async fn get_pipeline_steps(&self, pipeline_id: &PipelineId) -> Result<Vec<Step>>;

    /// Dependency map restricted to the pipeline's steps
    async fn get_pipeline_dependencies(&self, pipeline_id: &PipelineId) -> Result<DependencyMap>;

    async fn create_step(&self, step: Step) -> Result<Step>;

    /// Record that `step_id` depends on `depends_on`; both must belong to
    /// `pipeline_id`
    async fn create_step_dependency(
        &self,
        pipeline_id: &PipelineId,
        step_id: &StepId,
        depends_on: &StepId,
    ) -> Result<()>;

    async fn create_tool(&self, tool: Tool) -> Result<Tool>;

    async fn get_tool(&self, id: &ToolId) -> Result<Option<Tool>>;
}

/// Persistence for run records
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<Run>;

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>>;

    async fn update_run(&self, run: &Run) -> Result<Run>;

    /// Runs, most recent first, optionally limited to one pipeline
    async fn list_runs(&self, pipeline_id: Option<&PipelineId>) -> Result<Vec<Run>>;
}
