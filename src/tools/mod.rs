//! Tool invocation facade.
//!
//! Workers reach infrastructure data only through named tools looked up in a
//! [`ToolRegistry`]. The registry is built once at startup and shared
//! read-only behind an `Arc`, so lookups need no locking.
//!
//! Two tool families ship with the crate:
//! - [`inventory`]: tools answering from an in-memory fleet snapshot
//! - [`remote`]: tools forwarding typed parameters to an inventory service over HTTP

pub mod inventory;
pub mod remote;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use inventory::{AssetFilter, FleetSnapshot, SnapshotTool};
pub use remote::RemoteTool;
pub use types::*;

/// Names of every tool with a typed parameter variant.
pub const KNOWN_TOOLS: [&str; 16] = [
    "query_assets",
    "get_golden_image",
    "get_drift_status",
    "compare_versions",
    "calculate_risk_score",
    "simulate_rollout",
    "get_compliance_status",
    "check_control",
    "get_dr_status",
    "list_certificates",
    "map_certificate_usage",
    "list_images",
    "query_alerts",
    "get_cost_report",
    "get_security_findings",
    "validate_tls_endpoint",
];

/// Errors raised by tools or by the facade itself.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("tool not registered: {0}")]
    NotFound(String),

    #[error("tool {tool} rejected parameters: {message}")]
    InvalidParams { tool: String, message: String },

    #[error("tool {tool} failed: {message}")]
    Failed { tool: String, message: String },

    #[error("tool {tool} returned {actual}, expected {expected}")]
    UnexpectedOutput {
        tool: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("transport error calling {tool}: {message}")]
    Transport { tool: String, message: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// A named, callable operation over infrastructure data.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used for lookup.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Execute with typed parameters.
    async fn execute(&self, params: &ToolParams) -> Result<ToolOutput, ToolError>;
}

/// Audit record of one tool call. Never persisted by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub params: ToolParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Name-to-tool lookup facade.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!("Replaced tool registration: {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up the tool addressed by `params` and run it, recording the call.
    pub async fn invoke(&self, params: ToolParams) -> (Result<ToolOutput, ToolError>, ToolInvocation) {
        let name = params.tool_name().to_string();
        let timestamp = Utc::now();
        let start = Instant::now();

        let result = match self.get(&name) {
            Some(tool) => tool.execute(&params).await,
            None => Err(ToolError::NotFound(name.clone())),
        };

        let invocation = ToolInvocation {
            tool: name,
            params,
            error: result.as_ref().err().map(|e| e.to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp,
        };

        (result, invocation)
    }
}

/// Shared, immutable tool registry.
pub type SharedToolRegistry = Arc<ToolRegistry>;
