//! Patch rollouts to the approved image version.

use async_trait::async_trait;

use super::prompt::PromptBuilder;
use super::session::{most_common, risk_input, scope_query};
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::{default_plan, RolloutDefaults};
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{Asset, ToolOutput, ToolParams};

pub struct PatchRolloutWorker;

const TOOLS: &[&str] = &[
    "query_assets",
    "get_golden_image",
    "compare_versions",
    "calculate_risk_score",
    "simulate_rollout",
];

#[async_trait]
impl Worker for PatchRolloutWorker {
    fn name(&self) -> &str {
        "patch-orchestrator"
    }

    fn description(&self) -> &str {
        "Plans staged patch rollouts to the approved image version"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::PatchRollout]
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
        if assets.is_empty() {
            return Err(WorkerError::InvalidTask(format!(
                "no assets match {:?}",
                task.context.asset_filter
            )));
        }

        let family = task
            .context
            .metadata
            .get("image_family")
            .and_then(|v| v.as_str())
            .or_else(|| most_common(assets.iter().filter_map(|a| a.image_family.as_deref())))
            .map(str::to_string);
        let target = session
            .essential(
                ToolParams::GetGoldenImage {
                    family: family.clone(),
                    platform: task.context.platforms.first().cloned(),
                },
                ToolOutput::into_golden_image,
            )
            .await?;

        let outdated: Vec<Asset> = assets
            .iter()
            .filter(|a| a.image_family.as_deref() == Some(target.family.as_str()))
            .filter(|a| a.image_version.as_deref() != Some(target.version.as_str()))
            .cloned()
            .collect();

        if outdated.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!(
                    "All {} assets already run {} {}",
                    assets.len(),
                    target.family,
                    target.version
                ))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let current = most_common(outdated.iter().filter_map(|a| a.image_version.as_deref()))
            .unwrap_or("unknown")
            .to_string();
        let comparison = session
            .optional(
                ToolParams::CompareVersions {
                    current: current.clone(),
                    target: target.version.clone(),
                },
                ToolOutput::into_version_comparison,
            )
            .await?;
        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(risk_input(task, &outdated, "patch")),
                ToolOutput::into_risk_score,
            )
            .await?;

        let major = comparison.as_ref().map_or(false, |c| c.major_change);
        if comparison.as_ref().map_or(false, |c| !c.is_upgrade) {
            session.record_error(format!(
                "target {} is not newer than current {}",
                target.version, current
            ));
        }
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: outdated.len(),
            critical_assets: outdated.iter().filter(|a| a.critical).count(),
            engine_score: engine.as_ref(),
            floor: major.then_some(RiskTier::High),
        });

        let defaults = RolloutDefaults::for_risk(risk);
        let simulation = session
            .optional(
                ToolParams::SimulateRollout {
                    asset_count: outdated.len(),
                    canary_percentage: task
                        .constraints
                        .canary_percentage
                        .unwrap_or(defaults.canary_percentage),
                    wave_percentage: task
                        .constraints
                        .wave_percentage
                        .unwrap_or(defaults.wave_percentage),
                },
                ToolOutput::into_simulation,
            )
            .await?;

        let fallback = default_plan(task.task_type, outdated.len(), risk, &task.constraints);
        let mut prompt = PromptBuilder::for_task(task).json("Target image", &target);
        if let Some(c) = &comparison {
            prompt = prompt.json("Version change", c);
        }
        if let Some(sim) = &simulation {
            prompt = prompt.json("Rollout simulation", sim);
        }
        let prompt = prompt
            .list("Assets to patch", &outdated)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;

        let mut quality = score_plan(&resolved.plan);
        if task.constraints.require_canary.unwrap_or(false) && !resolved.plan.has_canary() {
            session.record_error("plan has no canary phase although the task requires one");
            quality -= 25.0;
        }

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "Patch {} of {} assets from {} to {} {}{}",
                outdated.len(),
                assets.len(),
                current,
                target.family,
                target.version,
                if major { " (major version change)" } else { "" }
            ))
            .affected_assets(outdated.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}
