//! Security scans: triage findings and plan remediation.

use std::collections::BTreeSet;

use async_trait::async_trait;

use super::prompt::PromptBuilder;
use super::session::scope_query;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{SecurityFinding, ToolOutput, ToolParams};

pub struct SecurityScanWorker;

const TOOLS: &[&str] = &["query_assets", "get_security_findings", "get_golden_image"];

fn count_at(findings: &[SecurityFinding], tier: RiskTier) -> usize {
    findings.iter().filter(|f| f.severity == tier).count()
}

#[async_trait]
impl Worker for SecurityScanWorker {
    fn name(&self) -> &str {
        "security-scanner"
    }

    fn description(&self) -> &str {
        "Triages security findings and plans their remediation"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::SecurityScan]
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

        let assets = session
            .essential(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?;
        let mut findings = session
            .essential(
                ToolParams::GetSecurityFindings {
                    filter: task.context.asset_filter.clone(),
                    cves: Vec::new(),
                },
                ToolOutput::into_security_findings,
            )
            .await?;
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));

        if findings.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!("No open findings across {} assets", assets.len()))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let baseline = session
            .optional(
                ToolParams::GetGoldenImage {
                    family: None,
                    platform: task.context.platforms.first().cloned(),
                },
                ToolOutput::into_golden_image,
            )
            .await?;

        let affected: BTreeSet<&str> = findings.iter().map(|f| f.asset_id.as_str()).collect();
        let critical_assets = assets
            .iter()
            .filter(|a| a.critical && affected.contains(a.id.as_str()))
            .count();
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: affected.len(),
            critical_assets,
            engine_score: None,
            floor: findings.first().map(|f| f.severity),
        });

        let fallback = default_plan(task.task_type, affected.len(), risk, &task.constraints);
        let mut prompt = PromptBuilder::for_task(task).list("Findings", &findings);
        if let Some(image) = &baseline {
            prompt = prompt.json("Current golden image", image);
        }
        let prompt = prompt.reference_plan(&fallback).build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} findings ({} critical, {} high) on {} of {} assets",
                findings.len(),
                count_at(&findings, RiskTier::Critical),
                count_at(&findings, RiskTier::High),
                affected.len(),
                assets.len()
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
    use crate::testing::{context_with, plan_json, ScriptedLlm};

    #[tokio::test]
    async fn test_critical_findings_gate_the_plan() {
        let ctx = context_with(ScriptedLlm::single(plan_json(2, RiskTier::Critical)));
        let task = TaskSpec::new("acme", TaskType::SecurityScan, "scan the web tier")
            .with_asset_filter("role=web");

        let result = SecurityScanWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.status, ResultStatus::PendingApproval);
        assert_eq!(result.risk, RiskTier::Critical);
        assert!(result.hitl_required);
        assert_eq!(result.affected_assets, 2);
        assert!(result.summary.starts_with("2 findings (2 critical, 0 high) on 2 of 4 assets"));
    }

    #[tokio::test]
    async fn test_clean_scope_is_a_report() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let task = TaskSpec::new("acme", TaskType::SecurityScan, "scan windows")
            .with_asset_filter("platform=windows");

        let result = SecurityScanWorker.execute(&task, &ctx).await.unwrap();
        assert_eq!(result.status, ResultStatus::Completed);
        assert_eq!(result.summary, "No open findings across 2 assets");
    }
}
