//! Task dispatch: route a task to a worker, bound it in time, gate the result.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::gate::{self, HitlReason};
use crate::llm::LlmClient;
use crate::result::WorkerResult;
use crate::task::{TaskSpec, TaskType};
use crate::tools::SharedToolRegistry;
use crate::workers::{ExecutionContext, SharedWorkerRegistry, WorkerError, WorkerRef};

/// Applied when the task carries no timeout of its own.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no worker registered for task type {0}")]
    NoWorker(TaskType),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker {worker} does not handle task type {task_type}")]
    WorkerMismatch { worker: String, task_type: TaskType },

    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: String,
        #[source]
        source: WorkerError,
    },
}

impl DispatchError {
    /// True when the caller sent something unroutable.
    pub fn is_client_error(&self) -> bool {
        match self {
            DispatchError::NoWorker(_)
            | DispatchError::UnknownWorker(_)
            | DispatchError::WorkerMismatch { .. } => true,
            DispatchError::Worker { source, .. } => {
                matches!(source, WorkerError::InvalidTask(_))
            }
        }
    }
}

/// Routes tasks to registered workers and runs them.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedWorkerRegistry,
    tools: SharedToolRegistry,
    llm: Arc<dyn LlmClient>,
    default_timeout: Duration,
    max_tokens: Option<u64>,
}

impl Dispatcher {
    pub fn new(registry: SharedWorkerRegistry, tools: SharedToolRegistry, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            registry,
            tools,
            llm,
            default_timeout: DEFAULT_TASK_TIMEOUT,
            max_tokens: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u64>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn registry(&self) -> &SharedWorkerRegistry {
        &self.registry
    }

    /// Pick the worker for `task_type`.
    ///
    /// A preferred worker must exist and support the type. Otherwise the
    /// first worker registered for the type wins.
    pub async fn select(&self, task_type: TaskType, preferred: Option<&str>) -> Result<WorkerRef, DispatchError> {
        if let Some(name) = preferred {
            let worker = self
                .registry
                .get(name)
                .await
                .ok_or_else(|| DispatchError::UnknownWorker(name.to_string()))?;
            if !worker.supported_tasks().contains(&task_type) {
                return Err(DispatchError::WorkerMismatch {
                    worker: name.to_string(),
                    task_type,
                });
            }
            return Ok(worker);
        }

        self.registry
            .get_for_task(task_type)
            .await
            .into_iter()
            .next()
            .ok_or(DispatchError::NoWorker(task_type))
    }

    /// Run `task` on the selected worker and return its gated result.
    pub async fn dispatch(
        &self,
        task: &TaskSpec,
        preferred: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<WorkerResult, DispatchError> {
        let worker = self.select(task.task_type, preferred).await?;
        let timeout = task.timeout().unwrap_or(self.default_timeout);
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| DispatchError::Worker {
                worker: worker.name().to_string(),
                source: WorkerError::InvalidTask(format!(
                    "timeout of {}s is out of range",
                    timeout.as_secs()
                )),
            })?;
        let ctx = ExecutionContext::new(Arc::clone(&self.tools), Arc::clone(&self.llm))
            .with_cancel(cancel)
            .with_deadline(deadline)
            .with_max_tokens(self.max_tokens);

        tracing::info!(
            "Dispatching task {} ({}) to {} with {}s timeout",
            task.id,
            task.task_type,
            worker.name(),
            timeout.as_secs()
        );

        let result = worker.execute(task, &ctx).await.map_err(|source| {
            if source.is_interruption() {
                tracing::warn!("Task {} interrupted: {}", task.id, source);
            } else {
                tracing::error!("Task {} failed in {}: {}", task.id, worker.name(), source);
            }
            DispatchError::Worker {
                worker: worker.name().to_string(),
                source,
            }
        })?;

        Ok(enforce_gate(result, task))
    }
}

/// Re-apply the quality cap and the HITL gate to a worker's result.
///
/// Reasons already on the result are kept; the gate can only close.
pub fn enforce_gate(mut result: WorkerResult, task: &TaskSpec) -> WorkerResult {
    result.quality_score = gate::cap_quality(result.quality_score, result.parse_outcome);

    let mut reasons = gate::evaluate_hitl(&result);
    if task.hitl_required {
        reasons.push(HitlReason::RequestedByTask);
    }
    for reason in reasons {
        if !result.hitl_reasons.contains(&reason) {
            result.hitl_reasons.push(reason);
        }
    }
    result.hitl_required = result.hitl_required || !result.hitl_reasons.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use crate::plan::ParseOutcome;
    use crate::result::ResultStatus;
    use crate::task::RiskTier;
    use crate::testing::{plan_json, sample_snapshot, ScriptedLlm};
    use crate::tools::ToolRegistry;
    use crate::workers::{builtin_workers, Worker, WorkerRegistry};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Returns a hand-made result that skipped the builder.
    struct Rogue;

    #[async_trait]
    impl Worker for Rogue {
        fn name(&self) -> &str {
            "rogue"
        }

        fn description(&self) -> &str {
            "returns ungated results"
        }

        fn supported_tasks(&self) -> &[TaskType] {
            &[TaskType::DriftRemediation]
        }

        fn required_tools(&self) -> &[&'static str] {
            &[]
        }

        async fn execute(&self, task: &TaskSpec, _ctx: &ExecutionContext) -> Result<WorkerResult, WorkerError> {
            Ok(WorkerResult {
                task_id: task.id,
                task_type: task.task_type,
                worker: "rogue".to_string(),
                status: ResultStatus::PendingApproval,
                plan: None,
                provenance: None,
                parse_outcome: Some(ParseOutcome::Lenient),
                summary: String::new(),
                affected_assets: 1,
                risk: RiskTier::High,
                quality_score: 95.0,
                token_usage: TokenUsage::default(),
                evidence: Vec::new(),
                tool_invocations: Vec::new(),
                errors: Vec::new(),
                actions: Vec::new(),
                hitl_required: false,
                hitl_reasons: Vec::new(),
                created_at: Utc::now(),
            })
        }
    }

    async fn dispatcher(llm: ScriptedLlm, extra: Option<WorkerRef>) -> Dispatcher {
        let registry = Arc::new(WorkerRegistry::new());
        if let Some(worker) = extra {
            registry.register(worker).await;
        }
        for worker in builtin_workers() {
            registry.register(worker).await;
        }
        let mut tools = ToolRegistry::new();
        Arc::new(sample_snapshot()).register_tools(&mut tools);
        Dispatcher::new(registry, Arc::new(tools), Arc::new(llm))
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_builtin_worker() {
        let d = dispatcher(ScriptedLlm::single(plan_json(4, RiskTier::Medium)), None).await;
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift")
            .with_asset_filter("region=us-east-1");

        let result = d.dispatch(&task, None, CancellationToken::new()).await.unwrap();
        assert_eq!(result.worker, "drift-remediator");
        assert_eq!(result.task_id, task.id);
    }

    #[tokio::test]
    async fn test_first_registered_worker_wins_unless_preferred() {
        let d = dispatcher(ScriptedLlm::single(plan_json(4, RiskTier::Medium)), Some(Arc::new(Rogue))).await;
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift");

        assert_eq!(d.select(task.task_type, None).await.unwrap().name(), "rogue");
        assert_eq!(
            d.select(task.task_type, Some("drift-remediator")).await.unwrap().name(),
            "drift-remediator"
        );
    }

    #[tokio::test]
    async fn test_gate_is_reenforced_on_ungated_results() {
        let d = dispatcher(ScriptedLlm::new(vec![]), Some(Arc::new(Rogue))).await;
        let mut task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift");
        task.hitl_required = true;

        let result = d.dispatch(&task, None, CancellationToken::new()).await.unwrap();

        assert!(result.hitl_required);
        assert_eq!(result.quality_score, 60.0);
        assert_eq!(
            result.hitl_reasons,
            vec![
                HitlReason::ElevatedRisk { risk: RiskTier::High },
                HitlReason::UntrustedParse {
                    outcome: ParseOutcome::Lenient
                },
                HitlReason::RequestedByTask,
            ]
        );
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let d = dispatcher(ScriptedLlm::new(vec![]), None).await;
        let task = TaskSpec::new("acme", TaskType::PatchRollout, "patch");

        let err = d.dispatch(&task, Some("nobody"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownWorker(ref n) if n == "nobody"));
        assert!(err.is_client_error());

        let err = d
            .dispatch(&task, Some("cost-optimizer"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkerMismatch { .. }));

        let empty = Dispatcher::new(
            Arc::new(WorkerRegistry::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedLlm::new(vec![])),
        );
        let err = empty.dispatch(&task, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoWorker(TaskType::PatchRollout)));
    }

    #[tokio::test]
    async fn test_cancelled_task_surfaces_interruption() {
        let d = dispatcher(ScriptedLlm::single(plan_json(4, RiskTier::Medium)), None).await;
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = d.dispatch(&task, None, cancel).await.unwrap_err();
        match err {
            DispatchError::Worker { worker, source } => {
                assert_eq!(worker, "drift-remediator");
                assert!(matches!(source, WorkerError::Cancelled { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_exceeds_deadline() {
        let d = dispatcher(ScriptedLlm::single(plan_json(4, RiskTier::Medium)), None).await;
        let mut task = TaskSpec::new("acme", TaskType::ComplianceAudit, "audit");
        task.timeout_secs = Some(0);

        let err = d.dispatch(&task, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Worker {
                source: WorkerError::DeadlineExceeded { .. },
                ..
            }
        ));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_is_rejected() {
        let d = dispatcher(ScriptedLlm::single(plan_json(4, RiskTier::Medium)), None).await;
        let task: TaskSpec = serde_json::from_value(serde_json::json!({
            "org_id": "acme",
            "task_type": "drift_remediation",
            "goal": "fix drift",
            "timeout_secs": u64::MAX,
        }))
        .unwrap();

        let err = d.dispatch(&task, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Worker {
                source: WorkerError::InvalidTask(_),
                ..
            }
        ));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_failed_completion_surfaces_without_fallback() {
        let d = dispatcher(ScriptedLlm::new(vec![]), None).await;
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift")
            .with_asset_filter("region=us-east-1");

        let err = d.dispatch(&task, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Worker {
                source: WorkerError::Completion(_),
                ..
            }
        ));
        assert!(!err.is_client_error());
    }
}
