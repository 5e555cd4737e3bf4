//! Result/response envelope returned for every executed task.
//!
//! A [`WorkerResult`] is assembled once through [`ResultBuilder`] and is
//! immutable afterwards. `build` is where the quality cap and the HITL gate
//! are applied, so no worker can return a result that skipped them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::gate::{self, HitlReason};
use crate::llm::TokenUsage;
use crate::plan::{ExtractError, ParseOutcome, Plan, PlanProvenance, ResolvedPlan};
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::ToolInvocation;
use crate::workers::WorkerError;

/// Lifecycle of a result. Only the external approval workflow moves a
/// result past its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Approve,
    Modify,
    Reject,
    Acknowledge,
    Dismiss,
}

/// A decision a human may take on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub label: String,
    pub description: String,
}

impl Action {
    pub fn new(kind: ActionKind, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            description: description.into(),
        }
    }

    /// approve / modify / reject, for results that carry a plan.
    pub fn gating(subject: &str) -> Vec<Action> {
        vec![
            Action::new(
                ActionKind::Approve,
                format!("Approve {}", subject),
                "Release the plan to the execution workflow as proposed",
            ),
            Action::new(
                ActionKind::Modify,
                format!("Modify {}", subject),
                "Edit phases or constraints and resubmit for review",
            ),
            Action::new(
                ActionKind::Reject,
                format!("Reject {}", subject),
                "Discard the plan; nothing is executed",
            ),
        ]
    }

    /// acknowledge / dismiss, for report-only results.
    pub fn terminal(subject: &str) -> Vec<Action> {
        vec![
            Action::new(
                ActionKind::Acknowledge,
                format!("Acknowledge {}", subject),
                "Mark the findings as reviewed",
            ),
            Action::new(
                ActionKind::Dismiss,
                format!("Dismiss {}", subject),
                "Close the report without follow-up",
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Tool,
    Completion,
    Extraction,
}

/// Raw material kept for audit, with a content digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub label: String,
    pub source: EvidenceSource,
    /// Hex SHA-256 of the serialized payload.
    pub digest: String,
    pub payload: Value,
}

impl Evidence {
    pub fn new(label: impl Into<String>, source: EvidenceSource, payload: Value) -> Self {
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(&bytes));
        Self {
            label: label.into(),
            source,
            digest,
            payload,
        }
    }

    pub fn tool<T: Serialize>(tool: &str, output: &T) -> Self {
        let payload = serde_json::to_value(output).unwrap_or(Value::Null);
        Self::new(tool, EvidenceSource::Tool, payload)
    }

    pub fn completion(raw: &str) -> Self {
        Self::new("completion_output", EvidenceSource::Completion, Value::String(raw.to_string()))
    }

    pub fn extraction_failure(err: &ExtractError) -> Self {
        Self::new(
            "extraction_failure",
            EvidenceSource::Extraction,
            Value::String(err.to_string()),
        )
    }
}

/// The envelope returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub worker: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<PlanProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_outcome: Option<ParseOutcome>,
    pub summary: String,
    pub affected_assets: usize,
    pub risk: RiskTier,
    pub quality_score: f64,
    pub token_usage: TokenUsage,
    pub evidence: Vec<Evidence>,
    pub tool_invocations: Vec<ToolInvocation>,
    pub errors: Vec<String>,
    pub actions: Vec<Action>,
    pub hitl_required: bool,
    pub hitl_reasons: Vec<HitlReason>,
    pub created_at: DateTime<Utc>,
}

impl WorkerResult {
    /// True when the caller may treat the plan as auto-executable.
    pub fn is_auto_executable(&self) -> bool {
        self.plan.is_some() && !self.hitl_required
    }
}

/// Step-by-step assembly of a [`WorkerResult`].
pub struct ResultBuilder {
    task_id: Uuid,
    task_type: TaskType,
    task_requires_hitl: bool,
    worker: String,
    subject: String,
    plan: Option<Plan>,
    provenance: Option<PlanProvenance>,
    parse_outcome: Option<ParseOutcome>,
    report_only: bool,
    summary: String,
    affected_assets: usize,
    risk: RiskTier,
    quality_score: Option<f64>,
    token_usage: TokenUsage,
    evidence: Vec<Evidence>,
    tool_invocations: Vec<ToolInvocation>,
    errors: Vec<String>,
    actions: Option<Vec<Action>>,
}

impl ResultBuilder {
    pub fn new(task: &TaskSpec, worker: &str) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            task_requires_hitl: task.hitl_required,
            worker: worker.to_string(),
            subject: task.task_type.to_string().replace('_', " "),
            plan: None,
            provenance: None,
            parse_outcome: None,
            report_only: false,
            summary: String::new(),
            affected_assets: 0,
            risk: task.risk_level.unwrap_or_default(),
            quality_score: None,
            token_usage: TokenUsage::default(),
            evidence: Vec::new(),
            tool_invocations: Vec::new(),
            errors: Vec::new(),
            actions: None,
        }
    }

    /// Attach the plan produced by the extraction pipeline.
    pub fn resolved_plan(mut self, resolved: ResolvedPlan) -> Self {
        if let Some(err) = &resolved.extraction_error {
            self.evidence.push(Evidence::extraction_failure(err));
        }
        self.plan = Some(resolved.plan);
        self.provenance = Some(resolved.provenance);
        self.parse_outcome = Some(resolved.outcome);
        self
    }

    /// Mark the result as a report: no plan, terminal `completed` status.
    /// `outcome` is `None` when no completion text was parsed.
    pub fn report_only(mut self, outcome: Option<ParseOutcome>) -> Self {
        self.report_only = true;
        self.plan = None;
        self.provenance = None;
        self.parse_outcome = outcome;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn affected_assets(mut self, count: usize) -> Self {
        self.affected_assets = count;
        self
    }

    pub fn risk(mut self, risk: RiskTier) -> Self {
        self.risk = risk;
        self
    }

    /// Worker-computed quality before the provenance cap.
    pub fn quality(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage.add(usage);
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_invocations.extend(invocations);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn errors(mut self, errors: Vec<String>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Override the default action set.
    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Finish assembly: enforce the plan invariant, cap quality, run the gate.
    pub fn build(self) -> Result<WorkerResult, WorkerError> {
        if let Some(plan) = &self.plan {
            plan.validate().map_err(WorkerError::InvalidPlan)?;
        } else if !self.report_only {
            return Err(WorkerError::MissingPlan(self.worker));
        }

        let raw_quality = match (self.quality_score, &self.plan) {
            (Some(q), _) => q,
            (None, Some(plan)) => gate::score_plan(plan),
            (None, None) => 0.0,
        };
        let quality_score = gate::cap_quality(raw_quality, self.parse_outcome);

        let (status, default_actions) = if self.report_only {
            (ResultStatus::Completed, Action::terminal(&self.subject))
        } else {
            (ResultStatus::PendingApproval, Action::gating(&self.subject))
        };

        let mut result = WorkerResult {
            task_id: self.task_id,
            task_type: self.task_type,
            worker: self.worker,
            status,
            plan: self.plan,
            provenance: self.provenance,
            parse_outcome: self.parse_outcome,
            summary: self.summary,
            affected_assets: self.affected_assets,
            risk: self.risk,
            quality_score,
            token_usage: self.token_usage,
            evidence: self.evidence,
            tool_invocations: self.tool_invocations,
            errors: self.errors,
            actions: self.actions.unwrap_or(default_actions),
            hitl_required: false,
            hitl_reasons: Vec::new(),
            created_at: Utc::now(),
        };

        let mut reasons = gate::evaluate_hitl(&result);
        if self.task_requires_hitl {
            reasons.push(HitlReason::RequestedByTask);
        }
        result.hitl_required = !reasons.is_empty();
        result.hitl_reasons = reasons;

        tracing::info!(
            task_id = %result.task_id,
            worker = %result.worker,
            status = %result.status,
            risk = %result.risk,
            quality = result.quality_score,
            hitl = result.hitl_required,
            "Result assembled"
        );

        Ok(result)
    }
}
