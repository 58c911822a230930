use super::dag::DependencyGraph;
use crate::error::{PipelineError, PipelineResult};
use crate::storage::PipelineStore;
use crate::types::{
    DependencyMap, ExecutionPlan, Pipeline, PipelineId, Step, StepConfig, StepId, Tool, ToolId,
};
use std::sync::Arc;

/// Authoring and read-side façade over persisted pipelines.
///
/// Graphs are built on demand from the store and never cached.
pub struct PipelineManager {
    store: Arc<dyn PipelineStore>,
}

impl PipelineManager {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub async fn create_pipeline(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> PipelineResult<Pipeline> {
        let mut pipeline = Pipeline::new(name);
        pipeline.description = description;
        Ok(self.store.create_pipeline(pipeline).await?)
    }

    pub async fn register_tool(&self, tool: Tool) -> PipelineResult<Tool> {
        Ok(self.store.create_tool(tool).await?)
    }

    /// Add a step at the end of a pipeline
    pub async fn create_step(
        &self,
        pipeline_id: PipelineId,
        tool_id: ToolId,
        name: impl Into<String>,
        config: StepConfig,
    ) -> PipelineResult<Step> {
        if self.store.get_pipeline(&pipeline_id).await?.is_none() {
            return Err(PipelineError::PipelineNotFound(pipeline_id));
        }

        let position = self.store.get_pipeline_steps(&pipeline_id).await?.len();
        let step = Step {
            id: StepId::generate(),
            pipeline_id,
            tool_id,
            name: name.into(),
            description: None,
            position: u32::try_from(position).unwrap_or(u32::MAX),
            config,
        };

        let step = self.store.create_step(step).await?;
        tracing::info!("Created step {} in pipeline {}", step.id, pipeline_id);
        Ok(step)
    }

    /// Record that `step_id` depends on `depends_on` within one pipeline.
    ///
    /// The pipeline is not re-validated here; run [`Self::validate_pipeline`]
    /// before executing it.
    pub async fn add_dependency(
        &self,
        pipeline_id: &PipelineId,
        step_id: &StepId,
        depends_on: &StepId,
    ) -> PipelineResult<()> {
        self.store
            .create_step_dependency(pipeline_id, step_id, depends_on)
            .await?;
        tracing::info!("Created step dependency: {} -> {}", step_id, depends_on);
        Ok(())
    }

    /// All steps of a pipeline and its dependency map
    pub async fn get_pipeline_dag(
        &self,
        pipeline_id: &PipelineId,
    ) -> PipelineResult<(Vec<Step>, DependencyMap)> {
        let steps = self.store.get_pipeline_steps(pipeline_id).await?;
        let dependencies = self.store.get_pipeline_dependencies(pipeline_id).await?;
        Ok((steps, dependencies))
    }

    pub async fn build_graph(&self, pipeline_id: &PipelineId) -> PipelineResult<DependencyGraph> {
        let (steps, dependencies) = self.get_pipeline_dag(pipeline_id).await?;
        Ok(DependencyGraph::build(&steps, &dependencies)?)
    }

    /// Check that a pipeline can be executed
    pub async fn validate_pipeline(&self, pipeline_id: &PipelineId) -> PipelineResult<()> {
        let (steps, dependencies) = self.get_pipeline_dag(pipeline_id).await?;

        if steps.is_empty() {
            return Err(PipelineError::NoSteps(*pipeline_id));
        }

        let dag = DependencyGraph::build(&steps, &dependencies)?;

        let sorted = dag.topological_order()?;
        if sorted.len() != steps.len() {
            return Err(PipelineError::Unreachable {
                reachable: sorted.len(),
                total: steps.len(),
            });
        }

        Ok(())
    }

    pub async fn get_execution_plan(&self, pipeline_id: &PipelineId) -> PipelineResult<ExecutionPlan> {
        let dag = self.build_graph(pipeline_id).await?;
        Ok(dag.build_execution_plan()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::storage::MemoryStore;

    async fn manager_with_pipeline() -> (PipelineManager, PipelineId) {
        let manager = PipelineManager::new(Arc::new(MemoryStore::new()));
        let pipeline = manager
            .create_pipeline("ingest", Some("test".to_string()))
            .await
            .unwrap();
        manager
            .register_tool(Tool::new("echo", "Echo"))
            .await
            .unwrap();
        (manager, pipeline.id)
    }

    async fn add_step(manager: &PipelineManager, pipeline_id: PipelineId, name: &str) -> StepId {
        manager
            .create_step(pipeline_id, ToolId::new("echo"), name, StepConfig::new())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_plan_for_diamond() {
        let (manager, pipeline_id) = manager_with_pipeline().await;
        let start = add_step(&manager, pipeline_id, "start").await;
        let p1 = add_step(&manager, pipeline_id, "p1").await;
        let p2 = add_step(&manager, pipeline_id, "p2").await;
        let end = add_step(&manager, pipeline_id, "end").await;

        manager.add_dependency(&pipeline_id, &p1, &start).await.unwrap();
        manager.add_dependency(&pipeline_id, &p2, &start).await.unwrap();
        manager.add_dependency(&pipeline_id, &end, &p1).await.unwrap();
        manager.add_dependency(&pipeline_id, &end, &p2).await.unwrap();

        manager.validate_pipeline(&pipeline_id).await.unwrap();

        let plan = manager.get_execution_plan(&pipeline_id).await.unwrap();
        assert_eq!(plan.levels()[0], vec![start]);
        assert_eq!(plan.levels()[1], vec![p1, p2]);
        assert_eq!(plan.levels()[2], vec![end]);
    }

    #[tokio::test]
    async fn test_steps_get_increasing_positions() {
        let (manager, pipeline_id) = manager_with_pipeline().await;
        add_step(&manager, pipeline_id, "first").await;
        add_step(&manager, pipeline_id, "second").await;

        let (steps, _) = manager.get_pipeline_dag(&pipeline_id).await.unwrap();
        assert_eq!(steps[0].name, "first");
        assert_eq!(steps[0].position, 0);
        assert_eq!(steps[1].position, 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline_has_no_steps() {
        let (manager, pipeline_id) = manager_with_pipeline().await;

        let err = manager.validate_pipeline(&pipeline_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoSteps(id) if id == pipeline_id));

        let plan = manager.get_execution_plan(&pipeline_id).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_added_through_authoring_is_caught_on_validation() {
        let (manager, pipeline_id) = manager_with_pipeline().await;
        let a = add_step(&manager, pipeline_id, "a").await;
        let b = add_step(&manager, pipeline_id, "b").await;

        manager.add_dependency(&pipeline_id, &b, &a).await.unwrap();
        // Accepted without re-validation
        manager.add_dependency(&pipeline_id, &a, &b).await.unwrap();

        let err = manager.validate_pipeline(&pipeline_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::CycleDetected)));

        let err = manager.get_execution_plan(&pipeline_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::CycleDetected)));
    }

    #[tokio::test]
    async fn test_step_requires_existing_pipeline() {
        let (manager, _) = manager_with_pipeline().await;
        let missing = PipelineId::new();

        let err = manager
            .create_step(missing, ToolId::new("echo"), "x", StepConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PipelineNotFound(id) if id == missing));
    }
}
