//! Cost optimization: rightsizing of underutilized assets.

use async_trait::async_trait;
use serde::Serialize;

use super::prompt::PromptBuilder;
use super::session::scope_query;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{CostLineItem, CostReport, ToolOutput, ToolParams};

pub struct CostOptimizationWorker;

const TOOLS: &[&str] = &["query_assets", "get_cost_report"];

const DEFAULT_CPU_THRESHOLD: f64 = 10.0;

/// Share of current spend expected back from rightsizing one asset.
const RIGHTSIZING_SAVINGS: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
struct SavingsEstimate {
    currency: String,
    monthly_total: f64,
    monthly_savings: f64,
    candidates: Vec<String>,
}

#[async_trait]
impl Worker for CostOptimizationWorker {
    fn name(&self) -> &str {
        "cost-optimizer"
    }

    fn description(&self) -> &str {
        "Finds underutilized assets and plans rightsizing"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::CostOptimization]
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
        let threshold = task
            .constraints
            .extra
            .get("cpu_threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_CPU_THRESHOLD);

        let assets = session
            .essential(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?;
        let report = match session
            .optional(
                ToolParams::GetCostReport {
                    filter: task.context.asset_filter.clone(),
                },
                ToolOutput::into_cost,
            )
            .await?
        {
            Some(report) => report,
            None => {
                // Inventory carries enough to estimate without the billing export.
                let line_items: Vec<CostLineItem> = assets
                    .iter()
                    .filter_map(|a| {
                        a.monthly_cost.map(|cost| CostLineItem {
                            asset_id: a.id.clone(),
                            monthly_cost: cost,
                            cpu_utilization: a.cpu_utilization,
                        })
                    })
                    .collect();
                CostReport {
                    currency: "USD".to_string(),
                    monthly_total: line_items.iter().map(|i| i.monthly_cost).sum(),
                    line_items,
                }
            }
        };

        let candidates: Vec<&CostLineItem> = report
            .line_items
            .iter()
            .filter(|item| item.cpu_utilization.map_or(false, |cpu| cpu < threshold))
            .filter(|item| {
                !assets
                    .iter()
                    .any(|a| a.id == item.asset_id && a.critical)
            })
            .collect();

        let estimate = SavingsEstimate {
            currency: report.currency.clone(),
            monthly_total: report.monthly_total,
            monthly_savings: candidates.iter().map(|c| c.monthly_cost).sum::<f64>() * RIGHTSIZING_SAVINGS,
            candidates: candidates.iter().map(|c| c.asset_id.clone()).collect(),
        };
        session.record_evidence("savings_estimate", &estimate);

        if candidates.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!(
                    "No assets below {:.0}% CPU; monthly spend {:.2} {}",
                    threshold, report.monthly_total, report.currency
                ))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: candidates.len(),
            ..Default::default()
        });

        let fallback = default_plan(task.task_type, candidates.len(), risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .section("Utilization threshold", format!("{:.0}% CPU", threshold))
            .json("Savings estimate", &estimate)
            .list("Rightsizing candidates", &candidates)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} underutilized assets; estimated savings {:.2} {}/month of {:.2}",
                estimate.candidates.len(),
                estimate.monthly_savings,
                estimate.currency,
                estimate.monthly_total
            ))
            .affected_assets(estimate.candidates.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}
