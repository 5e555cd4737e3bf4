//! Drift remediation: bring assets back to their golden image.

use std::collections::HashSet;

use async_trait::async_trait;

use super::prompt::PromptBuilder;
use super::session::{most_common, risk_input, scope_query};
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{Asset, ToolOutput, ToolParams};

pub struct DriftRemediationWorker;

const TOOLS: &[&str] = &[
    "query_assets",
    "get_drift_status",
    "get_golden_image",
    "calculate_risk_score",
];

#[async_trait]
impl Worker for DriftRemediationWorker {
    fn name(&self) -> &str {
        "drift-remediator"
    }

    fn description(&self) -> &str {
        "Plans remediation of assets that drifted from their golden image"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::DriftRemediation]
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
        let query = scope_query(task);

        let assets = session
            .essential(ToolParams::QueryAssets(query.clone()), ToolOutput::into_assets)
            .await?;
        let drift = session
            .essential(ToolParams::GetDriftStatus(query), ToolOutput::into_drift)
            .await?;

        if drift.drifted.is_empty() {
            tracing::info!("[{}] No drift across {} assets", self.name(), assets.len());
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!("No drift detected across {} assets", assets.len()))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let drifted_ids: HashSet<&str> = drift.drifted.iter().map(|d| d.asset_id.as_str()).collect();
        let drifted_assets: Vec<Asset> = assets
            .iter()
            .filter(|a| drifted_ids.contains(a.id.as_str()))
            .cloned()
            .collect();

        let golden = session
            .optional(
                ToolParams::GetGoldenImage {
                    family: most_common(drifted_assets.iter().filter_map(|a| a.image_family.as_deref()))
                        .map(str::to_string),
                    platform: None,
                },
                ToolOutput::into_golden_image,
            )
            .await?;
        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(risk_input(task, &drifted_assets, "image")),
                ToolOutput::into_risk_score,
            )
            .await?;

        let worst = drift.drifted.iter().map(|d| d.severity).max();
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: drift.drifted.len(),
            critical_assets: drifted_assets.iter().filter(|a| a.critical).count(),
            engine_score: engine.as_ref(),
            floor: worst,
        });

        let fallback = default_plan(task.task_type, drift.drifted.len(), risk, &task.constraints);
        let mut prompt = PromptBuilder::for_task(task).section(
            "Fleet",
            format!(
                "{} of {} assets drifted ({:.0}%)",
                drift.drifted.len(),
                drift.total_assets,
                drift.drift_ratio() * 100.0
            ),
        );
        if let Some(image) = &golden {
            prompt = prompt.json("Golden image", image);
        }
        let prompt = prompt
            .list("Drifted assets", &drift.drifted)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;

        let mut quality = score_plan(&resolved.plan);
        if resolved.plan.max_phase_assets() > drift.drifted.len() {
            quality -= 10.0;
        }

        let target = golden
            .as_ref()
            .map(|g| format!("{} {}", g.family, g.version))
            .unwrap_or_else(|| "unknown baseline".to_string());
        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} of {} assets drifted from golden image {}",
                drift.drifted.len(),
                drift.total_assets,
                target
            ))
            .affected_assets(drift.drifted.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ParseOutcome, PlanProvenance};
    use crate::result::ResultStatus;
    use crate::testing::{context_with, context_without_tools, plan_json, ScriptedLlm};

    #[tokio::test]
    async fn test_clean_plan_for_low_risk_drift_is_auto_executable() {
        let llm = ScriptedLlm::single(plan_json(2, RiskTier::Medium));
        let ctx = context_with(llm.clone());
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift in us-east")
            .with_asset_filter("region=us-east-1");

        let result = DriftRemediationWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.status, ResultStatus::PendingApproval);
        assert_eq!(result.parse_outcome, Some(ParseOutcome::Direct));
        assert_eq!(result.provenance, Some(PlanProvenance::Generated));
        assert_eq!(result.affected_assets, 2);
        assert_eq!(result.risk, RiskTier::Medium);
        assert!(result.errors.is_empty());
        assert!(!result.hitl_required, "{:?}", result.hitl_reasons);
        assert!(result.summary.contains("ubuntu-base 2024.06.1"));
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_completion_falls_back() {
        let ctx = context_with(ScriptedLlm::single("I would patch everything tonight."));
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix all drift");

        let result = DriftRemediationWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.parse_outcome, Some(ParseOutcome::Lenient));
        assert_eq!(result.provenance, Some(PlanProvenance::Synthesized));
        assert!(result.quality_score <= 60.0);
        assert!(result.hitl_required);
        assert_eq!(result.affected_assets, 5);
        assert!(result.plan.unwrap().summary.starts_with("Fallback"));
    }

    #[tokio::test]
    async fn test_no_drift_is_a_report() {
        let llm = ScriptedLlm::new(vec![]);
        let ctx = context_with(llm.clone());
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "check edge")
            .with_asset_filter("role=edge");

        let result = DriftRemediationWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.status, ResultStatus::Completed);
        assert!(result.plan.is_none());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_completion_is_not_replaced_by_fallback() {
        let llm = ScriptedLlm::new(vec![]);
        let ctx = context_with(llm.clone());
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift in us-east")
            .with_asset_filter("region=us-east-1");

        let err = DriftRemediationWorker.execute(&task, &ctx).await.unwrap_err();

        assert!(matches!(err, WorkerError::Completion(_)), "{err}");
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_inventory_aborts() {
        let ctx = context_without_tools(ScriptedLlm::new(vec![]));
        let task = TaskSpec::new("acme", TaskType::DriftRemediation, "fix drift");
        let err = DriftRemediationWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Tool { ref tool, .. } if tool == "query_assets"));
    }
}
