//! Book-keeping for one worker execution.
//!
//! A [`Session`] wraps the [`ExecutionContext`] and records every tool call,
//! completion and degraded dependency so the worker only has to describe
//! its own logic. Essential tools abort the task; optional tools degrade.

use std::collections::HashMap;

use futures::future::join_all;
use serde::Serialize;

use super::prompt::PLAN_SYSTEM_PROMPT;
use super::{ExecutionContext, WorkerError};
use crate::llm::{ChatMessage, CompletionOptions, CompletionRequest, TokenUsage};
use crate::plan::{resolve_plan, Plan, ResolvedPlan};
use crate::result::{Evidence, ResultBuilder};
use crate::task::TaskSpec;
use crate::tools::{Asset, AssetQuery, RiskInput, ToolError, ToolInvocation, ToolOutput, ToolParams};

/// Inventory query covering the task's scope.
pub fn scope_query(task: &TaskSpec) -> AssetQuery {
    AssetQuery {
        filter: task.context.asset_filter.clone(),
        platforms: task.context.platforms.clone(),
        regions: task.context.regions.clone(),
        environment: None,
        limit: None,
    }
}

/// Most frequent value; ties go to the lexically smallest.
pub fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value)
}

/// Risk-engine input for a change of `change_kind` over `assets`.
pub fn risk_input(task: &TaskSpec, assets: &[Asset], change_kind: &str) -> RiskInput {
    RiskInput {
        asset_count: assets.len(),
        critical_assets: assets.iter().filter(|a| a.critical).count(),
        environment: task.environment.as_str().to_string(),
        change_kind: change_kind.to_string(),
    }
}

/// Output of one completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub truncated: bool,
}

pub struct Session<'a> {
    worker: &'a str,
    ctx: &'a ExecutionContext,
    invocations: Vec<ToolInvocation>,
    evidence: Vec<Evidence>,
    errors: Vec<String>,
    usage: TokenUsage,
}

impl<'a> Session<'a> {
    pub fn new(worker: &'a str, ctx: &'a ExecutionContext) -> Self {
        Self {
            worker,
            ctx,
            invocations: Vec::new(),
            evidence: Vec::new(),
            errors: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    async fn call(&mut self, params: ToolParams) -> Result<Result<ToolOutput, ToolError>, WorkerError> {
        let ctx = self.ctx;
        let name = params.tool_name().to_string();
        let (result, invocation) = ctx.guard(&name, ctx.tools.invoke(params)).await?;
        self.invocations.push(invocation);
        if let Ok(output) = &result {
            self.evidence.push(Evidence::tool(&name, output));
        }
        Ok(result)
    }

    /// Call a tool the worker cannot do without. Any failure aborts.
    pub async fn essential<T>(
        &mut self,
        params: ToolParams,
        extract: impl FnOnce(ToolOutput, &str) -> Result<T, ToolError>,
    ) -> Result<T, WorkerError> {
        let name = params.tool_name().to_string();
        let output = self
            .call(params)
            .await?
            .map_err(|e| WorkerError::tool(e, name.as_str()))?;
        extract(output, &name).map_err(|e| WorkerError::tool(e, name))
    }

    /// Call a tool the worker can proceed without.
    ///
    /// Failures are logged, recorded in `errors` and yield `None`.
    /// Cancellation and deadline still abort.
    pub async fn optional<T>(
        &mut self,
        params: ToolParams,
        extract: impl FnOnce(ToolOutput, &str) -> Result<T, ToolError>,
    ) -> Result<Option<T>, WorkerError> {
        let name = params.tool_name().to_string();
        let outcome = self
            .call(params)
            .await?
            .and_then(|output| extract(output, &name));
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!("[{}] Optional tool {} failed: {}", self.worker, name, err);
                self.errors.push(format!("degraded: {}", err));
                Ok(None)
            }
        }
    }

    /// Fan out independent optional calls concurrently.
    ///
    /// Results come back in `params` order and are recorded as if the calls
    /// had been made one after the other.
    pub async fn optional_many<T>(
        &mut self,
        params: Vec<ToolParams>,
        extract: impl Fn(ToolOutput, &str) -> Result<T, ToolError>,
    ) -> Result<Vec<Option<T>>, WorkerError> {
        if params.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.ctx;
        let calls = params.into_iter().map(|p| ctx.tools.invoke(p));
        let outcomes = ctx.guard("tool fan-out", join_all(calls)).await?;

        let mut values = Vec::with_capacity(outcomes.len());
        for (result, invocation) in outcomes {
            let name = invocation.tool.clone();
            self.invocations.push(invocation);
            if let Ok(output) = &result {
                self.evidence.push(Evidence::tool(&name, output));
            }
            match result.and_then(|output| extract(output, &name)) {
                Ok(value) => values.push(Some(value)),
                Err(err) => {
                    tracing::warn!("[{}] Optional tool {} failed: {}", self.worker, name, err);
                    self.errors.push(format!("degraded: {}", err));
                    values.push(None);
                }
            }
        }
        Ok(values)
    }

    /// Single completion request, raced against cancellation and deadline.
    pub async fn complete(&mut self, system: &str, prompt: String) -> Result<Completion, WorkerError> {
        let request = CompletionRequest::new(system)
            .with_message(ChatMessage::user(prompt))
            .with_options(CompletionOptions {
                temperature: Some(0.2),
                max_tokens: self.ctx.max_tokens,
            });

        tracing::debug!(
            "[{}] Requesting completion from {}",
            self.worker,
            self.ctx.llm.model()
        );
        let ctx = self.ctx;
        let response = ctx.guard("completion", ctx.llm.complete(&request)).await??;

        self.usage.add(response.usage);
        self.evidence.push(Evidence::completion(&response.content));
        let truncated = response.is_truncated();
        if truncated {
            tracing::warn!("[{}] Completion stopped at the output budget", self.worker);
        }
        Ok(Completion {
            text: response.content,
            truncated,
        })
    }

    /// Run plan extraction with `fallback` for the lenient tier.
    pub fn resolve(&self, text: &str, fallback: impl FnOnce() -> Plan) -> ResolvedPlan {
        let resolved = resolve_plan(text, fallback);
        tracing::info!(
            "[{}] Plan resolved: outcome={}, phases={}",
            self.worker,
            resolved.outcome,
            resolved.plan.phases.len()
        );
        resolved
    }

    /// Ask for a plan and recover it, falling back to `fallback`.
    ///
    /// A completion cut off at the output budget is recorded as an error.
    pub async fn generate_plan(&mut self, prompt: String, fallback: Plan) -> Result<ResolvedPlan, WorkerError> {
        let completion = self.complete(PLAN_SYSTEM_PROMPT, prompt).await?;
        if completion.truncated {
            self.record_error("completion truncated at the output budget");
        }
        Ok(self.resolve(&completion.text, move || fallback))
    }

    /// Record a worker finding that must reach a human.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn record_evidence<T: Serialize>(&mut self, label: &str, payload: &T) {
        self.evidence.push(Evidence::tool(label, payload));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Hand everything recorded so far to a fresh result builder.
    pub fn into_builder(self, task: &TaskSpec) -> ResultBuilder {
        let builder = ResultBuilder::new(task, self.worker)
            .invocations(self.invocations)
            .errors(self.errors)
            .usage(self.usage);
        self.evidence
            .into_iter()
            .fold(builder, |builder, e| builder.evidence(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, ScriptedLlm};
    use crate::tools::AssetQuery;

    #[test]
    fn test_most_common_breaks_ties_lexically() {
        let values = ["b", "a", "b", "a", "c"];
        assert_eq!(most_common(values.iter().copied()), Some("a"));
        assert_eq!(most_common(std::iter::empty()), None);
    }

    #[tokio::test]
    async fn test_optional_failure_degrades() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let mut session = Session::new("test-worker", &ctx);

        let missing = session
            .optional(
                ToolParams::Opaque {
                    name: "get_site_capacity".to_string(),
                    params: serde_json::json!({}),
                },
                |out, _| Ok(out),
            )
            .await
            .unwrap();

        assert!(missing.is_none());
        assert!(session.has_errors());
        assert_eq!(session.invocations.len(), 1);
    }

    #[tokio::test]
    async fn test_essential_failure_aborts() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let mut session = Session::new("test-worker", &ctx);

        let err = session
            .essential(
                ToolParams::QueryAssets(AssetQuery {
                    filter: Some("broken".to_string()),
                    ..Default::default()
                }),
                ToolOutput::into_assets,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Tool { ref tool, .. } if tool == "query_assets"));
    }

    #[tokio::test]
    async fn test_shape_mismatch_on_essential_tool_aborts() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let mut session = Session::new("test-worker", &ctx);
        let err = session
            .essential(
                ToolParams::QueryAssets(AssetQuery::default()),
                ToolOutput::into_drift,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Tool {
                source: ToolError::UnexpectedOutput { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_completion_usage_and_evidence_are_recorded() {
        let ctx = context_with(ScriptedLlm::new(vec!["{}".to_string()]));
        let mut session = Session::new("test-worker", &ctx);
        let completion = session.complete("system", "prompt".to_string()).await.unwrap();
        assert_eq!(completion.text, "{}");
        assert!(session.usage.total_tokens > 0);
        assert_eq!(session.evidence.len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_plan_is_recorded_and_falls_back() {
        let full = crate::testing::plan_json(4, crate::task::RiskTier::Medium);
        let cut: String = full.chars().take(full.chars().count() / 2).collect();
        let ctx = context_with(ScriptedLlm::single(cut).with_stop_reason("length"));
        let mut session = Session::new("test-worker", &ctx);
        let fallback = crate::plan::default_plan(
            crate::task::TaskType::PatchRollout,
            4,
            crate::task::RiskTier::Medium,
            &Default::default(),
        );

        let resolved = session.generate_plan("prompt".to_string(), fallback).await.unwrap();

        assert_eq!(resolved.outcome, crate::plan::ParseOutcome::Lenient);
        assert_eq!(session.errors, vec!["completion truncated at the output budget".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_optional_tool_still_aborts() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        ctx.cancel.cancel();
        let mut session = Session::new("test-worker", &ctx);
        let err = session
            .optional(ToolParams::GetDrStatus { site: None }, ToolOutput::into_dr_status)
            .await
            .unwrap_err();
        assert!(err.is_interruption());
    }

    #[tokio::test]
    async fn test_fan_out_keeps_order_and_degrades_per_call() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let mut session = Session::new("test-worker", &ctx);

        let params = ["https://www.example.com:443", "https://nowhere.example.com:443"]
            .into_iter()
            .map(|endpoint| ToolParams::ValidateTlsEndpoint {
                endpoint: endpoint.to_string(),
            })
            .collect();
        let checks = session
            .optional_many(params, ToolOutput::into_tls_check)
            .await
            .unwrap();

        assert_eq!(checks.len(), 2);
        assert!(checks[0].as_ref().map_or(false, |c| c.valid));
        assert!(checks[1].is_none());
        assert_eq!(session.invocations.len(), 2);
        assert_eq!(session.errors.len(), 1);
    }
}
