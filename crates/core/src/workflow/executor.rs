use super::dag::DependencyGraph;
use crate::config::effective_max_parallel;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{NodeStatus, Step, StepId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Executes the work behind a single graph node
#[async_trait::async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run `step` given the results of its completed dependencies
    async fn execute(
        &self,
        step: &Step,
        inputs: HashMap<StepId, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Walks a dependency graph level by level.
///
/// Every node of a level runs concurrently, bounded by a pool of
/// `max_parallel` permits, and the level is joined before the next one
/// starts. A failed node skips its dependents and lets its siblings finish,
/// then execution stops after that level.
pub struct GraphExecutor {
    dag: Arc<DependencyGraph>,
    executor: Arc<dyn NodeExecutor>,
    max_parallel: usize,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl GraphExecutor {
    pub fn new(
        dag: Arc<DependencyGraph>,
        executor: Arc<dyn NodeExecutor>,
        max_parallel: usize,
    ) -> Self {
        let max_parallel = effective_max_parallel(max_parallel);
        Self {
            dag,
            executor,
            max_parallel,
            permits: Arc::new(Semaphore::new(max_parallel)),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before the next level once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn dag(&self) -> &Arc<DependencyGraph> {
        &self.dag
    }

    /// Execute the whole graph
    pub async fn execute(&self) -> PipelineResult<()> {
        let plan = self.dag.build_execution_plan()?;

        for (level_idx, level) in plan.levels().iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!("Graph execution cancelled before level {}", level_idx);
                return Err(PipelineError::Cancelled);
            }

            tracing::debug!("Starting level {} with {} steps", level_idx, level.len());

            let failures = self.execute_level(level).await;

            if let Some(first) = failures.into_iter().next() {
                tracing::error!("Level {} execution failed: {}", level_idx, first);
                return Err(first);
            }
        }

        Ok(())
    }

    async fn execute_level(&self, level: &[StepId]) -> Vec<PipelineError> {
        let mut tasks = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, StepId> = HashMap::new();

        for step_id in level {
            if self.dag.status(step_id) == Some(NodeStatus::Skipped) {
                tracing::info!("Skipping step {} due to failed dependencies", step_id);
                continue;
            }

            let dag = self.dag.clone();
            let executor = self.executor.clone();
            let permits = self.permits.clone();
            let task_step = step_id.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed while the executor is alive
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Err(PipelineError::Cancelled);
                };
                execute_node(&dag, executor.as_ref(), &task_step).await
            });
            spawned.insert(handle.id(), step_id.clone());
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(join_error) => {
                    let Some(step_id) = spawned.get(&join_error.id()) else {
                        failures.push(PipelineError::Storage(anyhow::anyhow!(
                            "untracked node task failed: {}",
                            join_error
                        )));
                        continue;
                    };
                    let message = format!("node task aborted: {}", join_error);
                    tracing::error!("Step {} {}", step_id, message);
                    if let Err(e) = self.dag.mark_failed(step_id, message.clone()) {
                        failures.push(e.into());
                    }
                    failures.push(PipelineError::NodeExecution {
                        step: step_id.clone(),
                        message,
                    });
                }
            }
        }

        failures
    }
}

/// Run one node and record its outcome on the graph
async fn execute_node(
    dag: &DependencyGraph,
    executor: &dyn NodeExecutor,
    step_id: &StepId,
) -> PipelineResult<()> {
    let step = dag
        .step(step_id)
        .cloned()
        .ok_or_else(|| crate::error::GraphError::StepNotFound(step_id.clone()))?;

    dag.mark_running(step_id)?;
    let inputs = dag.dependency_results(step_id)?;

    tracing::info!("Executing step {} (tool {})", step_id, step.tool_id);

    match executor.execute(&step, inputs).await {
        Ok(result) => {
            dag.mark_completed(step_id, result)?;
            tracing::debug!("Step {} completed", step_id);
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            let skipped = dag.mark_failed(step_id, message.clone())?;
            tracing::warn!(
                "Step {} failed: {} ({} dependent steps skipped)",
                step_id,
                message,
                skipped.len()
            );
            Err(PipelineError::NodeExecution {
                step: step_id.clone(),
                message,
            })
        }
    }
}
