//! Service configuration.
//!
//! Values come from an optional YAML file (path in `FLEET_CONFIG`) and from
//! environment variables, which override the file:
//!
//! - `FLEET_BIND_ADDR` - listen address (default `127.0.0.1:8080`)
//! - `FLEET_LLM_API_URL` - base URL of an OpenAI-compatible API (`/chat/completions` is appended)
//! - `FLEET_LLM_API_KEY` - bearer token for the completion service
//! - `FLEET_LLM_MODEL` - model name sent with every request
//! - `FLEET_LLM_MAX_TOKENS` - output budget per completion
//! - `FLEET_TASK_TIMEOUT_SECS` - default per-task deadline
//! - `FLEET_TOOLS_BASE_URL` - inventory service for remote tools
//! - `FLEET_SNAPSHOT_PATH` - fleet snapshot YAML for local tools

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_VAR: &str = "FLEET_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("no tool source configured; set FLEET_TOOLS_BASE_URL or FLEET_SNAPSHOT_PATH")]
    NoToolSource,
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Where workers get their infrastructure data from.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSource {
    Remote(String),
    Snapshot(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub llm_api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_max_tokens: u64,
    pub task_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            llm_api_url: "http://127.0.0.1:11434/v1".to_string(),
            llm_api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            llm_max_tokens: 4096,
            task_timeout_secs: 300,
            tools_base_url: None,
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load from `FLEET_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Merge an optional file with overrides looked up through `env`.
    pub fn from_sources(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };

        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = var("FLEET_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = var("FLEET_LLM_API_URL") {
            config.llm_api_url = v;
        }
        if let Some(v) = var("FLEET_LLM_API_KEY") {
            config.llm_api_key = Some(v);
        }
        if let Some(v) = var("FLEET_LLM_MODEL") {
            config.llm_model = v;
        }
        if let Some(v) = var("FLEET_LLM_MAX_TOKENS") {
            config.llm_max_tokens = v
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("FLEET_LLM_MAX_TOKENS", format!("{}", e)))?;
        }
        if let Some(v) = var("FLEET_TASK_TIMEOUT_SECS") {
            config.task_timeout_secs = v
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("FLEET_TASK_TIMEOUT_SECS", format!("{}", e)))?;
        }
        if let Some(v) = var("FLEET_TOOLS_BASE_URL") {
            config.tools_base_url = Some(v);
        }
        if let Some(v) = var("FLEET_SNAPSHOT_PATH") {
            config.snapshot_path = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if !self.llm_api_url.starts_with("http://") && !self.llm_api_url.starts_with("https://") {
            return Err(ConfigError::invalid("llm_api_url", "must be an http(s) URL"));
        }
        if self.llm_model.trim().is_empty() {
            return Err(ConfigError::invalid("llm_model", "must not be empty"));
        }
        if self.llm_max_tokens == 0 {
            return Err(ConfigError::invalid("llm_max_tokens", "must be positive"));
        }
        if self.task_timeout_secs == 0 {
            return Err(ConfigError::invalid("task_timeout_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::invalid("bind_addr", format!("{}", e)))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// The remote service wins when both sources are set.
    pub fn tool_source(&self) -> Result<ToolSource, ConfigError> {
        match (&self.tools_base_url, &self.snapshot_path) {
            (Some(url), _) => Ok(ToolSource::Remote(url.clone())),
            (None, Some(path)) => Ok(ToolSource::Snapshot(path.clone())),
            (None, None) => Err(ConfigError::NoToolSource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = Config::from_sources(None, env(&[])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.task_timeout(), Duration::from_secs(300));
        assert!(matches!(config.tool_source(), Err(ConfigError::NoToolSource)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_addr: 0.0.0.0:9000\nllm_model: file-model\nsnapshot_path: /tmp/fleet.yaml\ntask_timeout_secs: 60"
        )
        .unwrap();

        let config = Config::from_sources(
            Some(file.path()),
            env(&[("FLEET_LLM_MODEL", "env-model"), ("FLEET_LLM_MAX_TOKENS", "1024")]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.llm_model, "env-model");
        assert_eq!(config.llm_max_tokens, 1024);
        assert_eq!(config.task_timeout_secs, 60);
        assert_eq!(
            config.tool_source().unwrap(),
            ToolSource::Snapshot(PathBuf::from("/tmp/fleet.yaml"))
        );
    }

    #[test]
    fn test_remote_tools_win_over_snapshot() {
        let config = Config::from_sources(
            None,
            env(&[
                ("FLEET_TOOLS_BASE_URL", "http://inventory:8000"),
                ("FLEET_SNAPSHOT_PATH", "/tmp/fleet.yaml"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.tool_source().unwrap(),
            ToolSource::Remote("http://inventory:8000".to_string())
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::from_sources(None, env(&[("FLEET_TASK_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FLEET_TASK_TIMEOUT_SECS", .. }));

        let err = Config::from_sources(None, env(&[("FLEET_BIND_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "bind_addr", .. }));

        let err = Config::from_sources(None, env(&[("FLEET_TASK_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "task_timeout_secs", .. }));
    }

    #[test]
    fn test_unreadable_and_malformed_files() {
        let err = Config::from_sources(Some(Path::new("/nonexistent/fleet.yaml")), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "task_timeout_secs: [not, a, number]").unwrap();
        let err = Config::from_sources(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
