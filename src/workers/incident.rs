//! Incident investigation. Read-only: produces a findings report, never a plan.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompt::{PromptBuilder, REPORT_SYSTEM_PROMPT};
use super::session::scope_query;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, RiskSignals};
use crate::plan::{extract_structured, ParseOutcome};
use crate::result::{Evidence, WorkerResult};
use crate::task::{TaskSpec, TaskType};
use crate::tools::{Alert, AssetQuery, DriftReport, ToolOutput, ToolParams};

pub struct IncidentInvestigationWorker;

const TOOLS: &[&str] = &["query_assets", "query_alerts", "get_drift_status"];

const DEFAULT_LOOKBACK_HOURS: u32 = 24;

/// Findings of one investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub summary: String,
    #[serde(default)]
    pub probable_cause: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub affected_assets: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
}

impl IncidentReport {
    /// Report built from the raw evidence when the completion is unusable.
    fn from_evidence(alerts: &[Alert], drift: Option<&DriftReport>, lookback_hours: u32) -> Self {
        let mut alerting: Vec<String> = alerts.iter().filter_map(|a| a.asset_id.clone()).collect();
        alerting.sort();
        alerting.dedup();

        let drifted: Vec<&str> = drift
            .map(|d| {
                d.drifted
                    .iter()
                    .map(|x| x.asset_id.as_str())
                    .filter(|id| alerting.iter().any(|a| a.as_str() == *id))
                    .collect()
            })
            .unwrap_or_default();

        let worst = alerts.iter().max_by_key(|a| a.severity);
        let summary = match worst {
            Some(alert) => format!(
                "{} alerts in the last {} hours; most severe: {} ({})",
                alerts.len(),
                lookback_hours,
                alert.title,
                alert.severity
            ),
            None => format!("No alerts in the last {} hours", lookback_hours),
        };
        let probable_cause = if drifted.is_empty() {
            "undetermined".to_string()
        } else {
            format!("alerting assets drifted from baseline: {}", drifted.join(", "))
        };

        let mut timeline: Vec<&Alert> = alerts.iter().collect();
        timeline.sort_by_key(|a| a.raised_at);

        Self {
            summary,
            probable_cause,
            confidence: if drifted.is_empty() { 0.2 } else { 0.4 },
            affected_assets: alerting,
            recommendations: vec![
                "Review alerting assets with their owning team".to_string(),
                "Re-run the investigation once more telemetry is available".to_string(),
            ],
            timeline: timeline
                .into_iter()
                .map(|a| format!("{} {}", a.raised_at.to_rfc3339(), a.title))
                .collect(),
        }
    }
}

#[async_trait]
impl Worker for IncidentInvestigationWorker {
    fn name(&self) -> &str {
        "incident-investigator"
    }

    fn description(&self) -> &str {
        "Correlates alerts, drift and inventory into a findings report"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::IncidentInvestigation]
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
        let lookback_hours = task
            .constraints
            .extra
            .get("lookback_hours")
            .and_then(|v| v.as_u64())
            .map(|h| h.min(24 * 30) as u32)
            .unwrap_or(DEFAULT_LOOKBACK_HOURS);

        let assets = session
            .essential(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?;
        let alerts = session
            .optional(
                ToolParams::QueryAlerts {
                    filter: task.context.asset_filter.clone(),
                    since_hours: Some(lookback_hours),
                },
                ToolOutput::into_alerts,
            )
            .await?
            .unwrap_or_default();
        let drift = session
            .optional(
                ToolParams::GetDriftStatus(AssetQuery {
                    filter: task.context.asset_filter.clone(),
                    ..Default::default()
                }),
                ToolOutput::into_drift,
            )
            .await?;

        let mut prompt = PromptBuilder::for_task(task)
            .section("Lookback", format!("{} hours", lookback_hours))
            .list("Alerts", &alerts)
            .list("Assets in scope", &assets);
        if let Some(d) = &drift {
            prompt = prompt.list("Drifted assets", &d.drifted);
        }
        let completion = session.complete(REPORT_SYSTEM_PROMPT, prompt.build()).await?;

        let (mut report, outcome, failure) = match extract_structured::<IncidentReport>(&completion.text) {
            Ok(extraction) => (extraction.value, extraction.outcome, None),
            Err(err) => {
                tracing::warn!("[{}] Report extraction failed: {}", self.name(), err);
                (
                    IncidentReport::from_evidence(&alerts, drift.as_ref(), lookback_hours),
                    ParseOutcome::Lenient,
                    Some(err),
                )
            }
        };

        let known: BTreeSet<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        let (cited, unknown): (Vec<String>, Vec<String>) = report
            .affected_assets
            .drain(..)
            .partition(|id| known.contains(id.as_str()));
        report.affected_assets = cited;
        if !unknown.is_empty() {
            session.record_error(format!(
                "report cited assets outside the investigated scope: {}",
                unknown.join(", ")
            ));
        }

        let quality = match outcome {
            ParseOutcome::Direct => 40.0 + 60.0 * report.confidence.clamp(0.0, 1.0),
            _ => 40.0,
        };
        let risk = assess_risk(&RiskSignals {
            hint: alerts.iter().map(|a| a.severity).max(),
            environment: Some(&task.environment),
            affected_assets: report.affected_assets.len(),
            ..Default::default()
        });
        let summary = if report.probable_cause.is_empty() {
            report.summary.clone()
        } else {
            format!("{} Probable cause: {}", report.summary, report.probable_cause)
        };

        session.record_evidence("incident_report", &report);
        let mut builder = session
            .into_builder(task)
            .report_only(Some(outcome))
            .summary(summary)
            .affected_assets(report.affected_assets.len())
            .risk(risk)
            .quality(quality);
        if let Some(err) = &failure {
            builder = builder.evidence(Evidence::extraction_failure(err));
        }
        builder.build()
    }
}
