use super::{config_str, ToolRunner};
use crate::config::ContainerConfig;
use crate::types::{StepConfig, Tool};
use anyhow::{anyhow, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Runs a tool as a one-shot container.
///
/// Step config keys: `image` (required), `command` (array of strings) and
/// `env` (object of string values). The input is written to the container's
/// stdin as JSON; stdout is parsed as JSON when possible.
pub struct ContainerToolRunner {
    runtime: String,
    timeout: Duration,
}

impl ContainerToolRunner {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            runtime: config.runtime.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Arguments passed to the container runtime for one invocation
    pub fn build_args(&self, config: &StepConfig) -> Result<Vec<String>> {
        let image = config_str(config, "image")
            .ok_or_else(|| anyhow!("container tool requires an `image` config entry"))?;

        let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];

        if let Some(env) = config.get("env") {
            let env = env
                .as_object()
                .ok_or_else(|| anyhow!("`env` must be an object"))?;
            for (key, value) in env {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                args.push("-e".to_string());
                args.push(format!("{}={}", key, value));
            }
        }

        args.push(image.to_string());

        if let Some(command) = config.get("command") {
            let command = command
                .as_array()
                .ok_or_else(|| anyhow!("`command` must be an array of strings"))?;
            for part in command {
                let part = part
                    .as_str()
                    .ok_or_else(|| anyhow!("`command` must be an array of strings"))?;
                args.push(part.to_string());
            }
        }

        Ok(args)
    }

    async fn invoke(&self, args: Vec<String>, input: &serde_json::Value) -> Result<serde_json::Value> {
        let mut child = Command::new(&self.runtime)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch container runtime `{}`", self.runtime))?;

        let payload = serde_json::to_vec(input).context("Failed to serialize tool input")?;
        let stdin = child.stdin.take();

        // Stdout is drained while the input is still being written
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A container that never reads stdin closes the pipe early
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!("Container did not consume stdin: {}", e);
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("Failed to wait for container")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "container exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(serde_json::from_str(stdout.trim())
            .unwrap_or_else(|_| serde_json::json!({ "stdout": stdout })))
    }
}

impl Default for ContainerToolRunner {
    fn default() -> Self {
        Self::new(&ContainerConfig::default())
    }
}

#[async_trait::async_trait]
impl ToolRunner for ContainerToolRunner {
    async fn run(
        &self,
        tool: &Tool,
        config: &StepConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let args = self.build_args(config)?;

        tracing::info!(
            tool_id = %tool.id,
            tool_name = %tool.name,
            runtime = %self.runtime,
            "Executing tool in container"
        );

        match timeout(self.timeout, self.invoke(args, input)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Tool {} timed out", tool.id);
                Err(anyhow!(
                    "container tool timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
