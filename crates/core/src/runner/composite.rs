use super::{config_str, ToolRunner};
use crate::types::{StepConfig, Tool};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_TOOL_TYPE: &str = "container";

/// Routes each invocation to a runner registered for the tool's type.
///
/// The type comes from the step's `type` config entry, then the tool's own
/// `kind`, then [`DEFAULT_TOOL_TYPE`].
#[derive(Default)]
pub struct CompositeToolRunner {
    runners: HashMap<String, Arc<dyn ToolRunner>>,
}

impl CompositeToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner for a tool type, replacing any previous one
    pub fn register(&mut self, tool_type: impl Into<String>, runner: Arc<dyn ToolRunner>) {
        self.runners.insert(tool_type.into(), runner);
    }

    pub fn with_runner(mut self, tool_type: impl Into<String>, runner: Arc<dyn ToolRunner>) -> Self {
        self.register(tool_type, runner);
        self
    }

    pub fn tool_type<'a>(tool: &'a Tool, config: &'a StepConfig) -> &'a str {
        config_str(config, "type")
            .or(tool.kind.as_deref())
            .unwrap_or(DEFAULT_TOOL_TYPE)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[async_trait::async_trait]
impl ToolRunner for CompositeToolRunner {
    async fn run(
        &self,
        tool: &Tool,
        config: &StepConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let tool_type = Self::tool_type(tool, config);
        let runner = self
            .runners
            .get(tool_type)
            .ok_or_else(|| anyhow!("no runner registered for tool type: {}", tool_type))?;

        tracing::debug!("Dispatching tool {} to {} runner", tool.id, tool_type);
        runner.run(tool, config, input).await
    }
}
