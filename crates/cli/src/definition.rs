//! Pipeline definitions read from TOML files.
//!
//! ```toml
//! name = "ingest"
//!
//! [[tools]]
//! id = "fetch"
//! name = "Fetch"
//! kind = "http"
//!
//! [[steps]]
//! id = "download"
//! tool = "fetch"
//! [steps.config]
//! url = "https://example.com/data"
//!
//! [[steps]]
//! id = "parse"
//! tool = "parser"
//! depends_on = ["download"]
//! ```

use anyhow::{Context, Result};
use pipewright_core::workflow::PipelineManager;
use pipewright_core::{Pipeline, Step, StepConfig, StepId, Tool, ToolId};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub config: StepConfig,
}

impl PipelineDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline definition {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse pipeline definition {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Persist tools, steps and dependencies through the manager
    pub async fn install(&self, manager: &PipelineManager) -> Result<Pipeline> {
        let pipeline = manager
            .create_pipeline(self.name.clone(), self.description.clone())
            .await?;

        for tool in &self.tools {
            manager
                .register_tool(Tool {
                    id: ToolId::new(tool.id.clone()),
                    name: tool.name.clone().unwrap_or_else(|| tool.id.clone()),
                    description: tool.description.clone(),
                    kind: tool.kind.clone(),
                })
                .await?;
        }

        for (position, def) in self.steps.iter().enumerate() {
            let mut step = Step::new(def.id.clone(), pipeline.id, ToolId::new(def.tool.clone()))
                .with_config(def.config.clone());
            step.name = def.name.clone().unwrap_or_else(|| def.id.clone());
            step.position = u32::try_from(position)?;
            manager.store().create_step(step).await?;
        }

        for def in &self.steps {
            for dependency in &def.depends_on {
                manager
                    .add_dependency(
                        &pipeline.id,
                        &StepId::new(def.id.clone()),
                        &StepId::new(dependency.clone()),
                    )
                    .await
                    .with_context(|| format!("Invalid dependency of step {}", def.id))?;
            }
        }

        tracing::info!(
            "Loaded pipeline {} with {} steps and {} tools",
            pipeline.name,
            self.steps.len(),
            self.tools.len()
        );

        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::storage::MemoryStore;
    use std::sync::Arc;

    const DIAMOND: &str = r#"
name = "diamond"
description = "fan out and back in"

[[tools]]
id = "sh"
kind = "container"

[[steps]]
id = "start"
tool = "sh"
[steps.config]
image = "alpine"

[[steps]]
id = "left"
tool = "sh"
depends_on = ["start"]

[[steps]]
id = "right"
name = "Right branch"
tool = "sh"
depends_on = ["start"]

[[steps]]
id = "end"
tool = "sh"
depends_on = ["left", "right"]
"#;

    #[test]
    fn test_parse_definition() {
        let def = PipelineDefinition::parse(DIAMOND).unwrap();

        assert_eq!(def.name, "diamond");
        assert_eq!(def.tools.len(), 1);
        assert_eq!(def.tools[0].kind.as_deref(), Some("container"));
        assert_eq!(def.steps.len(), 4);
        assert_eq!(def.steps[0].config["image"], "alpine");
        assert_eq!(def.steps[3].depends_on, vec!["left", "right"]);
    }

    #[test]
    fn test_step_requires_tool() {
        let err = PipelineDefinition::parse("name = \"x\"\n[[steps]]\nid = \"a\"\n").unwrap_err();
        assert!(err.to_string().contains("tool"));
    }

    #[tokio::test]
    async fn test_install_builds_plan() {
        let manager = PipelineManager::new(Arc::new(MemoryStore::new()));
        let def = PipelineDefinition::parse(DIAMOND).unwrap();

        let pipeline = def.install(&manager).await.unwrap();
        manager.validate_pipeline(&pipeline.id).await.unwrap();

        let plan = manager.get_execution_plan(&pipeline.id).await.unwrap();
        assert_eq!(
            plan.levels(),
            &[
                vec![StepId::new("start")],
                vec![StepId::new("left"), StepId::new("right")],
                vec![StepId::new("end")],
            ]
        );

        let (steps, _) = manager.get_pipeline_dag(&pipeline.id).await.unwrap();
        assert_eq!(steps[2].name, "Right branch");
        assert_eq!(steps[1].name, "left");
    }

    #[tokio::test]
    async fn test_same_definition_installed_twice() {
        let manager = PipelineManager::new(Arc::new(MemoryStore::new()));
        let def = PipelineDefinition::parse(DIAMOND).unwrap();

        let first = def.install(&manager).await.unwrap();
        let second = def.install(&manager).await.unwrap();

        for pipeline in [&first, &second] {
            manager.validate_pipeline(&pipeline.id).await.unwrap();
            let plan = manager.get_execution_plan(&pipeline.id).await.unwrap();
            assert_eq!(plan.total_steps(), 4);
            assert_eq!(plan.level_count(), 3);
        }
    }

    #[tokio::test]
    async fn test_install_rejects_unknown_dependency() {
        let manager = PipelineManager::new(Arc::new(MemoryStore::new()));
        let def = PipelineDefinition::parse(
            "name = \"x\"\n[[steps]]\nid = \"a\"\ntool = \"t\"\ndepends_on = [\"ghost\"]\n",
        )
        .unwrap();

        let err = def.install(&manager).await.unwrap_err();
        assert!(format!("{:#}", err).contains("ghost"));
    }
}
