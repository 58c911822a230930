//! Engine configuration, deserialized from TOML by the binaries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_PARALLEL: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent steps per run; zero falls back to the default
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            registry: RegistryConfig::default(),
            container: ContainerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn effective_max_parallel(&self) -> usize {
        effective_max_parallel(self.max_parallel)
    }
}

/// Normalizes a requested parallelism, mapping zero to the default.
pub fn effective_max_parallel(requested: usize) -> usize {
    if requested == 0 {
        DEFAULT_MAX_PARALLEL
    } else {
        requested
    }
}

/// Retention policy for finished run contexts in the execution registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container CLI used to launch tools (`docker`, `podman`, ...)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_container_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            timeout_secs: default_container_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_max_entries() -> usize {
    1024
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_container_timeout_secs() -> u64 {
    600
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("pipewright/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_max_parallel() {
        assert_eq!(effective_max_parallel(0), 4);
        assert_eq!(effective_max_parallel(7), 7);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "max_parallel": 2,
            "registry": { "retention_secs": 5 }
        }))
        .unwrap();

        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.registry.max_entries, 1024);
        assert_eq!(config.registry.retention(), Duration::from_secs(5));
        assert_eq!(config.container.runtime, "docker");
        assert_eq!(config.http.timeout_secs, 30);
    }
}
