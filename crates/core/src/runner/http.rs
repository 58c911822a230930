use super::{config_str, ToolRunner};
use crate::config::HttpConfig;
use crate::types::{StepConfig, Tool};
use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use std::time::Duration;

/// Runs a tool by calling an HTTP endpoint.
///
/// Step config keys: `url` (required), `method` (default `POST`) and
/// `headers` (object of string values).
pub struct HttpToolRunner {
    client: reqwest::Client,
}

impl HttpToolRunner {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ToolRunner for HttpToolRunner {
    async fn run(
        &self,
        tool: &Tool,
        config: &StepConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = config_str(config, "url")
            .ok_or_else(|| anyhow!("http tool requires a `url` config entry"))?;
        let method = config_str(config, "method").unwrap_or("POST");
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", method))?;

        tracing::info!(
            tool_id = %tool.id,
            tool_name = %tool.name,
            %method,
            url,
            "Executing tool via HTTP"
        );

        let mut request = self.client.request(method, url).json(&serde_json::json!({
            "tool_id": tool.id.0,
            "tool_name": tool.name,
            "input": input,
        }));

        if let Some(headers) = config.get("headers").and_then(serde_json::Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request.send().await.context("HTTP request failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            return Err(anyhow!("tool endpoint returned {}: {}", status, body.trim()));
        }

        Ok(serde_json::from_str(&body).unwrap_or_else(|_| serde_json::json!({ "body": body })))
    }
}
