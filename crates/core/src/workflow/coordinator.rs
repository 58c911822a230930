use super::executor::{GraphExecutor, NodeExecutor};
use super::manager::PipelineManager;
use super::registry::{ExecutionRegistry, RunExecutionContext};
use crate::config::EngineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::QueueService;
use crate::runner::ToolRunner;
use crate::storage::{PipelineStore, RunStore};
use crate::types::{ExecutionPlan, PipelineId, Run, RunId, RunStatus, Step, StepId};
use anyhow::{anyhow, Context};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// State shared between the coordinator and its drive tasks
struct Shared {
    manager: Arc<PipelineManager>,
    runs: Arc<dyn RunStore>,
    runner: Arc<dyn ToolRunner>,
    registry: ExecutionRegistry,
    max_parallel: usize,
    shutdown: CancellationToken,
}

/// Owns the lifecycle of pipeline runs.
///
/// `execute_pipeline` persists a queued run and returns immediately; the run
/// is driven to a terminal state by a background task that is tracked by the
/// coordinator rather than tied to the caller.
pub struct RunCoordinator {
    shared: Arc<Shared>,
    queue: Arc<dyn QueueService>,
    tasks: TaskTracker,
}

impl RunCoordinator {
    pub fn new(
        manager: Arc<PipelineManager>,
        runs: Arc<dyn RunStore>,
        runner: Arc<dyn ToolRunner>,
        queue: Arc<dyn QueueService>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                runs,
                runner,
                registry: ExecutionRegistry::new(config.registry.clone()),
                max_parallel: config.effective_max_parallel(),
                shutdown: CancellationToken::new(),
            }),
            queue,
            tasks: TaskTracker::new(),
        }
    }

    pub fn manager(&self) -> &Arc<PipelineManager> {
        &self.shared.manager
    }

    pub fn max_parallel(&self) -> usize {
        self.shared.max_parallel
    }

    /// Create a queued run for a pipeline and start driving it
    pub async fn execute_pipeline(
        &self,
        pipeline_id: PipelineId,
        input: serde_json::Value,
    ) -> PipelineResult<Run> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let pipeline = self
            .shared
            .manager
            .store()
            .get_pipeline(&pipeline_id)
            .await?
            .ok_or(PipelineError::PipelineNotFound(pipeline_id))?;

        // Graph problems surface here, before any run is persisted
        self.shared.manager.validate_pipeline(&pipeline.id).await?;

        let run = self
            .shared
            .runs
            .create_run(&Run::queued(pipeline.id, input))
            .await?;

        self.queue
            .enqueue_run(run.id)
            .await
            .context("Failed to queue run")?;

        tracing::info!("Queued run {} for pipeline {}", run.id, pipeline.name);

        let shared = self.shared.clone();
        let run_id = run.id;
        self.tasks.spawn(async move {
            shared.drive(run_id).await;
        });

        Ok(run)
    }

    /// In-memory state of a run that has started executing
    pub async fn get_execution_status(&self, run_id: &RunId) -> Option<Arc<RunExecutionContext>> {
        self.shared.registry.get(run_id).await
    }

    pub async fn get_run(&self, run_id: &RunId) -> PipelineResult<Run> {
        self.shared
            .runs
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(*run_id))
    }

    pub async fn list_runs(&self, pipeline_id: Option<&PipelineId>) -> PipelineResult<Vec<Run>> {
        Ok(self.shared.runs.list_runs(pipeline_id).await?)
    }

    pub async fn validate_pipeline(&self, pipeline_id: &PipelineId) -> PipelineResult<()> {
        self.shared.manager.validate_pipeline(pipeline_id).await
    }

    pub async fn get_execution_plan(&self, pipeline_id: &PipelineId) -> PipelineResult<ExecutionPlan> {
        self.shared.manager.get_execution_plan(pipeline_id).await
    }

    /// Number of runs whose drive task has not finished
    pub fn active_runs(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every run started so far has reached a terminal state
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        // A shutdown that raced with this wait keeps the tracker closed
        if !self.shared.shutdown.is_cancelled() {
            self.tasks.reopen();
        }
    }

    /// Stop accepting runs, interrupt running ones at their next level
    /// boundary and wait for every drive task to finish
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down run coordinator ({} active runs)", self.tasks.len());
        self.shared.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Shared {
    async fn drive(&self, run_id: RunId) {
        tracing::info!("Starting pipeline execution: run_id={}", run_id);

        let mut run = match self.runs.get_run(&run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                tracing::error!("Run {} disappeared before execution", run_id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to get run {}: {:#}", run_id, e);
                return;
            }
        };

        let now = Utc::now();
        run.status = RunStatus::Processing;
        run.started_at = Some(now);
        run.updated_at = now;
        if let Err(e) = self.runs.update_run(&run).await {
            let err = PipelineError::Storage(e.context("Failed to mark run as processing"));
            self.finish_run(run, None, Err(err)).await;
            return;
        }

        let dag = match self.manager.build_graph(&run.pipeline_id).await {
            Ok(dag) => Arc::new(dag),
            Err(e) => {
                self.finish_run(run, None, Err(e)).await;
                return;
            }
        };

        let context = Arc::new(RunExecutionContext::new(run.id, run.pipeline_id, dag.clone()));
        self.registry.register(context.clone()).await;

        let node_executor = Arc::new(RunNodeExecutor {
            store: self.manager.store().clone(),
            runner: self.runner.clone(),
            context: context.clone(),
            input: run.input.clone(),
        });

        let outcome = GraphExecutor::new(dag, node_executor, self.max_parallel)
            .with_cancellation(self.shutdown.child_token())
            .execute()
            .await;

        self.finish_run(run, Some(&context), outcome).await;
    }

    /// Record the terminal state of a run, in memory and in the store
    async fn finish_run(
        &self,
        mut run: Run,
        context: Option<&RunExecutionContext>,
        outcome: PipelineResult<()>,
    ) {
        let now = Utc::now();
        run.completed_at = Some(now);
        run.updated_at = now;

        match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
                run.progress = 100;
                run.error = None;
                tracing::info!("Pipeline execution completed: run_id={}", run.id);
            }
            Err(PipelineError::Cancelled) => {
                run.status = RunStatus::Cancelled;
                run.progress = context.map_or(0, RunExecutionContext::progress);
                run.error = Some(PipelineError::Cancelled.to_string());
                tracing::warn!("Pipeline execution cancelled: run_id={}", run.id);
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.progress = context.map_or(0, RunExecutionContext::progress);
                run.error = Some(e.to_string());
                tracing::error!("Pipeline execution failed: run_id={}, error={}", run.id, e);
            }
        }

        if let Some(context) = context {
            context.finish(run.status, run.error.clone());
        }

        if let Err(e) = self.runs.update_run(&run).await {
            tracing::error!("Failed to record {} state for run {}: {:#}", run.status, run.id, e);
        }
    }
}

/// Forwards graph nodes of one run to the tool runner and records results
struct RunNodeExecutor {
    store: Arc<dyn PipelineStore>,
    runner: Arc<dyn ToolRunner>,
    context: Arc<RunExecutionContext>,
    input: serde_json::Value,
}

#[async_trait::async_trait]
impl NodeExecutor for RunNodeExecutor {
    async fn execute(
        &self,
        step: &Step,
        inputs: HashMap<StepId, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let tool = self
            .store
            .get_tool(&step.tool_id)
            .await?
            .ok_or_else(|| anyhow!("tool {} not found", step.tool_id))?;

        let input = serde_json::json!({
            "input": self.input,
            "dependencies": inputs,
        });

        let result = self
            .runner
            .run(&tool, &step.config, &input)
            .await
            .context("tool execution failed")?;

        self.context.record_result(step.id.clone(), result.clone());

        Ok(result)
    }
}
