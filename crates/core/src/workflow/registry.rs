use super::dag::DependencyGraph;
use crate::config::RegistryConfig;
use crate::types::{PipelineId, RunId, RunStatus, StepId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug)]
struct ContextState {
    status: RunStatus,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
}

/// In-memory state of one in-flight run
#[derive(Debug)]
pub struct RunExecutionContext {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub started_at: DateTime<Utc>,
    dag: Arc<DependencyGraph>,
    state: RwLock<ContextState>,
    results: Mutex<HashMap<StepId, serde_json::Value>>,
}

impl RunExecutionContext {
    pub fn new(run_id: RunId, pipeline_id: PipelineId, dag: Arc<DependencyGraph>) -> Self {
        Self {
            run_id,
            pipeline_id,
            started_at: Utc::now(),
            dag,
            state: RwLock::new(ContextState {
                status: RunStatus::Processing,
                error: None,
                finished_at: None,
                finished: None,
            }),
            results: Mutex::new(HashMap::new()),
        }
    }

    pub fn dag(&self) -> &Arc<DependencyGraph> {
        &self.dag
    }

    pub fn status(&self) -> RunStatus {
        self.state.read().status
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().finished_at
    }

    pub fn is_finished(&self) -> bool {
        self.state.read().finished.is_some()
    }

    pub fn record_result(&self, step_id: StepId, result: serde_json::Value) {
        self.results.lock().insert(step_id, result);
    }

    pub fn result(&self, step_id: &StepId) -> Option<serde_json::Value> {
        self.results.lock().get(step_id).cloned()
    }

    /// Copy of every recorded step result
    pub fn results(&self) -> HashMap<StepId, serde_json::Value> {
        self.results.lock().clone()
    }

    /// Share of nodes in a terminal state, as a percentage
    pub fn progress(&self) -> u8 {
        let total = self.dag.len();
        if total == 0 {
            return if self.status() == RunStatus::Completed { 100 } else { 0 };
        }
        let finished = self.dag.finished_count();
        u8::try_from(finished * 100 / total).unwrap_or(100)
    }

    /// Mirror a terminal run status
    pub fn finish(&self, status: RunStatus, error: Option<String>) {
        let mut state = self.state.write();
        state.status = status;
        state.error = error;
        state.finished_at = Some(Utc::now());
        state.finished = Some(Instant::now());
    }

    fn finished_instant(&self) -> Option<Instant> {
        self.state.read().finished
    }
}

/// Registry of run contexts keyed by run identity.
///
/// Finished contexts are evicted once older than the configured retention,
/// or oldest-first when the registry is over capacity. Contexts of runs that
/// are still executing are never evicted.
pub struct ExecutionRegistry {
    config: RegistryConfig,
    contexts: tokio::sync::RwLock<HashMap<RunId, Arc<RunExecutionContext>>>,
}

impl ExecutionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            contexts: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, context: Arc<RunExecutionContext>) {
        let mut contexts = self.contexts.write().await;
        let evicted = Self::evict(&self.config, &mut contexts, 1);
        if evicted > 0 {
            tracing::debug!("Evicted {} finished run contexts", evicted);
        }
        contexts.insert(context.run_id, context);
    }

    pub async fn get(&self, run_id: &RunId) -> Option<Arc<RunExecutionContext>> {
        self.contexts.read().await.get(run_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    /// Drop finished contexts past their retention window
    pub async fn evict_expired(&self) -> usize {
        let mut contexts = self.contexts.write().await;
        Self::evict(&self.config, &mut contexts, 0)
    }

    /// Evict expired contexts, then make room for `incoming` new entries
    fn evict(
        config: &RegistryConfig,
        contexts: &mut HashMap<RunId, Arc<RunExecutionContext>>,
        incoming: usize,
    ) -> usize {
        let before = contexts.len();
        let retention = config.retention();

        contexts.retain(|_, ctx| match ctx.finished_instant() {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });

        while contexts.len() + incoming > config.max_entries {
            let oldest = contexts
                .iter()
                .filter_map(|(id, ctx)| ctx.finished_instant().map(|at| (*id, at)))
                .min_by_key(|(_, at)| *at)
                .map(|(id, _)| id);

            match oldest {
                Some(id) => {
                    contexts.remove(&id);
                }
                None => break,
            }
        }

        before - contexts.len()
    }
}
