//! Compliance audits against a control framework.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::prompt::PromptBuilder;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{ControlResult, ToolOutput, ToolParams};

pub struct ComplianceAuditWorker;

const TOOLS: &[&str] = &["get_compliance_status", "check_control"];

/// Failing controls inspected in detail per audit.
const MAX_DETAILED_CONTROLS: usize = 5;

fn framework_of(task: &TaskSpec) -> String {
    task.constraints
        .extra
        .get("framework")
        .and_then(|v| v.as_str())
        .or_else(|| task.context.tags.get("framework").map(String::as_str))
        .unwrap_or("cis")
        .to_string()
}

#[async_trait]
impl Worker for ComplianceAuditWorker {
    fn name(&self) -> &str {
        "compliance-auditor"
    }

    fn description(&self) -> &str {
        "Audits controls of a compliance framework and plans remediation of failures"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::ComplianceAudit]
    }

    fn required_tools(&self) -> &[&'static str] {
        TOOLS
    }

    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &ExecutionContext,
    ) -> Result<WorkerResult, WorkerError> {
        let mut session = Session::new(self.name(), ctx);
        let framework = framework_of(task);

        let status = session
            .essential(
                ToolParams::GetComplianceStatus {
                    framework: framework.clone(),
                    filter: task.context.asset_filter.clone(),
                },
                ToolOutput::into_compliance,
            )
            .await?;

        let mut failing: Vec<ControlResult> = status.failing().cloned().collect();
        failing.sort_by(|a, b| b.severity.cmp(&a.severity));
        let score = status.score();

        if failing.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!(
                    "{}: no failing controls out of {} assessed (score {:.0}%)",
                    framework,
                    status.controls.len(),
                    score
                ))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let detail = failing
            .iter()
            .take(MAX_DETAILED_CONTROLS)
            .map(|control| ToolParams::CheckControl {
                framework: framework.clone(),
                control_id: control.control_id.clone(),
            })
            .collect();
        let checks: Vec<_> = session
            .optional_many(detail, ToolOutput::into_control)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let affected: BTreeSet<&str> = failing
            .iter()
            .flat_map(|c| c.affected_assets.iter().map(String::as_str))
            .collect();
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: affected.len(),
            critical_assets: 0,
            engine_score: None,
            floor: failing.first().map(|c| c.severity),
        });

        let fallback = default_plan(task.task_type, affected.len(), risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .section(
                "Framework",
                format!("{} (score {:.0}%, {} failing controls)", framework, score, failing.len()),
            )
            .list("Failing controls", &failing)
            .list("Control checks", &checks)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} score {:.0}%: {} failing controls across {} assets",
                framework,
                score,
                failing.len(),
                affected.len()
            ))
            .affected_assets(affected.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultStatus;
    use crate::task::Constraints;
    use crate::testing::{context_with, plan_json, ScriptedLlm};

    fn audit(framework: &str) -> TaskSpec {
        let mut constraints = Constraints::default();
        constraints
            .extra
            .insert("framework".to_string(), serde_json::json!(framework));
        TaskSpec::new("acme", TaskType::ComplianceAudit, "quarterly audit").with_constraints(constraints)
    }

    #[tokio::test]
    async fn test_failing_controls_produce_remediation_plan() {
        let llm = ScriptedLlm::single(plan_json(3, RiskTier::High));
        let ctx = context_with(llm.clone());

        let result = ComplianceAuditWorker.execute(&audit("cis"), &ctx).await.unwrap();

        assert_eq!(result.status, ResultStatus::PendingApproval);
        assert_eq!(result.affected_assets, 3);
        assert_eq!(result.risk, RiskTier::High);
        assert!(result.hitl_required);
        assert_eq!(
            result
                .tool_invocations
                .iter()
                .filter(|i| i.tool == "check_control")
                .count(),
            2
        );
        let prompt = &llm.requests()[0].messages[0].content;
        assert!(prompt.contains("PermitRootLogin"));
    }

    #[tokio::test]
    async fn test_clean_framework_is_a_report() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let result = ComplianceAuditWorker.execute(&audit("soc2"), &ctx).await.unwrap();
        assert_eq!(result.status, ResultStatus::Completed);
        assert!(result.summary.contains("no failing controls"));
    }

    #[tokio::test]
    async fn test_unassessed_framework_aborts() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let err = ComplianceAuditWorker
            .execute(&audit("pci-dss"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Tool { .. }));
    }

    #[test]
    fn test_framework_defaults_to_cis() {
        let task = TaskSpec::new("acme", TaskType::ComplianceAudit, "audit");
        assert_eq!(framework_of(&task), "cis");
    }
}
