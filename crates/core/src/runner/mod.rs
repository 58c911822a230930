// Tool runners: backends that execute a single step's tool

pub mod composite;
pub mod container;
pub mod http;

pub use composite::CompositeToolRunner;
pub use container::ContainerToolRunner;
pub use http::HttpToolRunner;

use crate::types::{StepConfig, Tool};
use anyhow::Result;

/// Executes a tool with the given configuration and input
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        tool: &Tool,
        config: &StepConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Adapter that lets a plain closure act as a [`ToolRunner`]
pub struct FnToolRunner<F> {
    f: F,
}

impl<F> FnToolRunner<F>
where
    F: Fn(&Tool, &StepConfig, &serde_json::Value) -> Result<serde_json::Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F> ToolRunner for FnToolRunner<F>
where
    F: Fn(&Tool, &StepConfig, &serde_json::Value) -> Result<serde_json::Value> + Send + Sync,
{
    async fn run(
        &self,
        tool: &Tool,
        config: &StepConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        (self.f)(tool, config, input)
    }
}

/// Read an optional string entry from a step configuration
pub(crate) fn config_str<'a>(config: &'a StepConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_runner_forwards_arguments() {
        let runner = FnToolRunner::new(|tool: &Tool, config: &StepConfig, input: &serde_json::Value| {
            Ok(serde_json::json!({
                "tool": tool.id.0,
                "mode": config.get("mode").cloned(),
                "input": input,
            }))
        });

        let mut config = StepConfig::new();
        config.insert("mode".to_string(), serde_json::json!("fast"));

        let output = runner
            .run(&Tool::new("echo", "Echo"), &config, &serde_json::json!(42))
            .await
            .unwrap();

        assert_eq!(output["tool"], "echo");
        assert_eq!(output["mode"], "fast");
        assert_eq!(output["input"], 42);
    }

    #[tokio::test]
    async fn test_fn_runner_propagates_errors() {
        let runner = FnToolRunner::new(|_: &Tool, _: &StepConfig, _: &serde_json::Value| {
            Err(anyhow::anyhow!("tool exploded"))
        });

        let err = runner
            .run(&Tool::new("x", "X"), &StepConfig::new(), &serde_json::Value::Null)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("tool exploded"));
    }
}
