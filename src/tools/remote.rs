//! Tools forwarding typed parameters to the inventory service over HTTP.
//!
//! Each call is `POST {base_url}/tools/{name}` with the tagged `ToolParams`
//! as body; the service answers with a tagged `ToolOutput`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{ToolOutput, ToolParams};
use super::{Tool, ToolError, ToolRegistry};

pub struct RemoteTool {
    name: String,
    base_url: String,
    client: Client,
}

impl RemoteTool {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            name: name.into(),
            base_url,
            client,
        }
    }

    /// Register a remote tool for each name, sharing one HTTP client.
    pub fn register_all(
        registry: &mut ToolRegistry,
        base_url: &str,
        names: &[&str],
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("fleet-orchestrator/0.1")
            .build()?;
        for name in names {
            registry.register(Arc::new(RemoteTool::new(*name, base_url, client.clone())));
        }
        tracing::info!("Registered {} remote tools against {}", names.len(), base_url);
        Ok(())
    }

    fn url(&self) -> String {
        format!("{}/tools/{}", self.base_url, self.name)
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Forwards the call to the inventory service"
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolOutput, ToolError> {
        let response = self
            .client
            .post(self.url())
            .json(params)
            .send()
            .await
            .map_err(|e| ToolError::Transport {
                tool: self.name.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ToolError::Transport {
            tool: self.name.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ToolError::failed(
                &self.name,
                format!("{} - {}", status, truncate(&body, 512)),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            ToolError::failed(&self.name, format!("undecodable response: {}", e))
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
