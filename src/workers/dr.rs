//! Disaster-recovery drills.

use async_trait::async_trait;
use chrono::Utc;

use super::prompt::PromptBuilder;
use super::session::risk_input;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::{default_plan, Plan};
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{AssetQuery, SiteRole, ToolOutput, ToolParams};

pub struct DrDrillWorker;

const TOOLS: &[&str] = &["get_dr_status", "query_assets", "calculate_risk_score"];

fn has_failback(plan: &Plan) -> bool {
    plan.phases.iter().any(|p| {
        let text = format!("{} {}", p.name, p.description).to_lowercase();
        text.contains("fail back") || text.contains("failback")
    })
}

#[async_trait]
impl Worker for DrDrillWorker {
    fn name(&self) -> &str {
        "dr-drill-planner"
    }

    fn description(&self) -> &str {
        "Plans failover drills between primary and secondary sites"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::DrDrill]
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
        let site = task
            .constraints
            .extra
            .get("site")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let status = session
            .essential(ToolParams::GetDrStatus { site }, ToolOutput::into_dr_status)
            .await?;

        let primary = status.sites.iter().find(|s| s.role == SiteRole::Primary);
        let secondary = status.sites.iter().find(|s| s.role == SiteRole::Secondary);
        let (Some(primary), Some(secondary)) = (primary, secondary) else {
            return Err(WorkerError::InvalidTask(
                "a drill needs both a primary and a secondary site".to_string(),
            ));
        };

        for s in status.sites.iter().filter(|s| !s.healthy) {
            session.record_error(format!("site {} is unhealthy", s.name));
        }
        if let (Some(lag), Some(rpo)) = (secondary.replication_lag_seconds, status.rpo_minutes) {
            if lag > u64::from(rpo) * 60 {
                session.record_error(format!(
                    "replication lag {}s on {} exceeds RPO of {} minutes",
                    lag, secondary.name, rpo
                ));
            }
        }

        let assets = session
            .optional(
                ToolParams::QueryAssets(AssetQuery {
                    filter: Some(format!("site={}", primary.name)),
                    ..Default::default()
                }),
                ToolOutput::into_assets,
            )
            .await?
            .unwrap_or_default();
        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(risk_input(task, &assets, "failover")),
                ToolOutput::into_risk_score,
            )
            .await?;

        let floor = if task.environment.is_production() {
            RiskTier::High
        } else {
            RiskTier::Medium
        };
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: assets.len(),
            critical_assets: assets.iter().filter(|a| a.critical).count(),
            engine_score: engine.as_ref(),
            floor: Some(floor),
        });

        let fallback = default_plan(task.task_type, assets.len(), risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .json("DR status", &status)
            .list("Assets on primary site", &assets)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let mut quality = score_plan(&resolved.plan);
        if !has_failback(&resolved.plan) {
            quality -= 15.0;
        }

        let last_drill = status
            .last_drill_at
            .map(|at| format!("last drill {} days ago", (Utc::now() - at).num_days()))
            .unwrap_or_else(|| "no previous drill recorded".to_string());
        let objectives = match (status.rpo_minutes, status.rto_minutes) {
            (Some(rpo), Some(rto)) => format!(" (RPO {}m, RTO {}m)", rpo, rto),
            _ => String::new(),
        };

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "DR drill {} -> {}{}; {}",
                primary.name, secondary.name, objectives, last_drill
            ))
            .affected_assets(assets.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ParseOutcome, PlanProvenance};
    use crate::task::{Constraints, Environment};
    use crate::testing::{context_with, plan_json, ScriptedLlm};

    #[tokio::test]
    async fn test_drill_plan_for_staging() {
        let ctx = context_with(ScriptedLlm::single(plan_json(1, RiskTier::Medium)));
        let task = TaskSpec::new("acme", TaskType::DrDrill, "quarterly failover drill");

        let result = DrDrillWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.parse_outcome, Some(ParseOutcome::Direct));
        assert_eq!(result.affected_assets, 1);
        assert_eq!(result.risk, RiskTier::Medium);
        assert!(result.errors.is_empty());
        assert!(result.summary.starts_with("DR drill fra1 -> iad1 (RPO 15m, RTO 60m)"));
        assert!(result.quality_score <= 85.0);
    }

    #[tokio::test]
    async fn test_production_drill_always_needs_approval() {
        let ctx = context_with(ScriptedLlm::single("drill plan: fail over, then fail back"));
        let task = TaskSpec::new("acme", TaskType::DrDrill, "failover drill")
            .with_environment(Environment::Production);

        let result = DrDrillWorker.execute(&task, &ctx).await.unwrap();

        assert!(result.risk >= RiskTier::High);
        assert!(result.hitl_required);
        assert_eq!(result.provenance, Some(PlanProvenance::Synthesized));
        assert!(has_failback(result.plan.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn test_single_site_is_rejected() {
        let mut constraints = Constraints::default();
        constraints
            .extra
            .insert("site".to_string(), serde_json::json!("fra1"));
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let task = TaskSpec::new("acme", TaskType::DrDrill, "drill").with_constraints(constraints);

        let err = DrDrillWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTask(_)));
    }
}
