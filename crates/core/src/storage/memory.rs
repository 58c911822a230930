use super::{PipelineStore, RunStore};
use crate::types::{DependencyMap, Pipeline, PipelineId, Run, RunId, Step, StepId, Tool, ToolId};
use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Tables {
    pipelines: HashMap<PipelineId, Pipeline>,
    // Step ids are only unique within their pipeline
    steps: HashMap<(PipelineId, StepId), Step>,
    dependencies: HashMap<(PipelineId, StepId), Vec<StepId>>,
    tools: HashMap<ToolId, Tool>,
    runs: HashMap<RunId, Run>,
}

/// In-process store for pipelines, tools and runs
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PipelineStore for MemoryStore {
    async fn create_pipeline(&self, pipeline: Pipeline) -> Result<Pipeline> {
        self.tables
            .write()
            .pipelines
            .insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get_pipeline(&self, id: &PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.tables.read().pipelines.get(id).cloned())
    }

    async fn get_pipeline_steps(&self, pipeline_id: &PipelineId) -> Result<Vec<Step>> {
        let mut steps: Vec<Step> = self
            .tables
            .read()
            .steps
            .values()
            .filter(|s| &s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        Ok(steps)
    }

    async fn get_pipeline_dependencies(&self, pipeline_id: &PipelineId) -> Result<DependencyMap> {
        let tables = self.tables.read();
        Ok(tables
            .dependencies
            .iter()
            .filter(|((owner, _), _)| owner == pipeline_id)
            .map(|((_, step_id), deps)| (step_id.clone(), deps.clone()))
            .collect())
    }

    async fn create_step(&self, step: Step) -> Result<Step> {
        let mut tables = self.tables.write();
        if !tables.pipelines.contains_key(&step.pipeline_id) {
            return Err(anyhow!("Pipeline {} not found", step.pipeline_id));
        }
        tables
            .steps
            .insert((step.pipeline_id, step.id.clone()), step.clone());
        Ok(step)
    }

    async fn create_step_dependency(
        &self,
        pipeline_id: &PipelineId,
        step_id: &StepId,
        depends_on: &StepId,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        for id in [step_id, depends_on] {
            if !tables.steps.contains_key(&(*pipeline_id, id.clone())) {
                return Err(anyhow!("Step {} not found in pipeline {}", id, pipeline_id));
            }
        }

        let deps = tables
            .dependencies
            .entry((*pipeline_id, step_id.clone()))
            .or_default();
        if !deps.contains(depends_on) {
            deps.push(depends_on.clone());
        }
        Ok(())
    }

    async fn create_tool(&self, tool: Tool) -> Result<Tool> {
        self.tables
            .write()
            .tools
            .insert(tool.id.clone(), tool.clone());
        Ok(tool)
    }

    async fn get_tool(&self, id: &ToolId) -> Result<Option<Tool>> {
        Ok(self.tables.read().tools.get(id).cloned())
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<Run> {
        self.tables.write().runs.insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self.tables.read().runs.get(id).cloned())
    }

    async fn update_run(&self, run: &Run) -> Result<Run> {
        let mut tables = self.tables.write();
        let stored = tables
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| anyhow!("Run {} not found", run.id))?;
        *stored = run.clone();
        Ok(run.clone())
    }

    async fn list_runs(&self, pipeline_id: Option<&PipelineId>) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .tables
            .read()
            .runs
            .values()
            .filter(|r| pipeline_id.map_or(true, |id| &r.pipeline_id == id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}
