use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId(pub Uuid);

impl PipelineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a pipeline step
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a tool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(pub String);

impl ToolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-step configuration handed to the tool runner
pub type StepConfig = serde_json::Map<String, serde_json::Value>;

/// Step identity -> identities of the steps it depends on
pub type DependencyMap = HashMap<StepId, Vec<StepId>>;

/// A named, ordered collection of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }
}

/// One unit of work in a pipeline, bound to a tool and its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub pipeline_id: PipelineId,
    pub tool_id: ToolId,
    pub name: String,
    pub description: Option<String>,
    pub position: u32,
    #[serde(default)]
    pub config: StepConfig,
}

impl Step {
    pub fn new(id: impl Into<String>, pipeline_id: PipelineId, tool_id: ToolId) -> Self {
        let id = StepId::new(id);
        Self {
            name: id.0.clone(),
            id,
            pipeline_id,
            tool_id,
            description: None,
            position: 0,
            config: StepConfig::new(),
        }
    }

    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }
}

/// An executable capability referenced by steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    pub description: Option<String>,
    /// Default runner type when the step configuration does not name one
    pub kind: Option<String>,
}

impl Tool {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ToolId::new(id),
            name: name.into(),
            description: None,
            kind: None,
        }
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// One execution attempt of a pipeline against a given input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    /// Percentage in `0..=100`
    pub progress: u8,
    #[serde(default)]
    pub input: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Run {
    pub fn queued(pipeline_id: PipelineId, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            pipeline_id,
            status: RunStatus::Queued,
            progress: 0,
            input,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Lifecycle of a single node during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Steps grouped into levels that can run concurrently.
///
/// A step's level is the length of the longest dependency chain ending at it,
/// so every dependency of a level `L` step sits in a level below `L`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "PlanShape", from = "PlanShape")]
pub struct ExecutionPlan {
    levels: Vec<Vec<StepId>>,
}

impl ExecutionPlan {
    pub fn new(levels: Vec<Vec<StepId>>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[Vec<StepId>] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn total_steps(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level index of a step, if it is part of the plan
    pub fn level_of(&self, step_id: &StepId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(step_id))
    }

    pub fn into_levels(self) -> Vec<Vec<StepId>> {
        self.levels
    }

    /// Summary shape used by outer layers when rendering a plan
    pub fn summary(&self, pipeline_id: PipelineId) -> PlanSummary {
        PlanSummary {
            pipeline_id,
            levels: self
                .levels
                .iter()
                .enumerate()
                .map(|(level, steps)| PlanLevel {
                    level,
                    steps: steps.clone(),
                })
                .collect(),
            total_steps: self.total_steps(),
        }
    }
}

/// Wire form of an [`ExecutionPlan`]
#[derive(Serialize, Deserialize)]
struct PlanShape {
    levels: Vec<PlanLevel>,
    #[serde(default)]
    total_steps: usize,
}

impl From<ExecutionPlan> for PlanShape {
    fn from(plan: ExecutionPlan) -> Self {
        let total_steps = plan.total_steps();
        Self {
            levels: plan
                .into_levels()
                .into_iter()
                .enumerate()
                .map(|(level, steps)| PlanLevel { level, steps })
                .collect(),
            total_steps,
        }
    }
}

impl From<PlanShape> for ExecutionPlan {
    fn from(shape: PlanShape) -> Self {
        let mut levels = shape.levels;
        levels.sort_by_key(|l| l.level);
        Self::new(levels.into_iter().map(|l| l.steps).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub pipeline_id: PipelineId,
    pub levels: Vec<PlanLevel>,
    pub total_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLevel {
    pub level: usize,
    pub steps: Vec<StepId>,
}
