//! SOP authoring: a reviewed procedure document plus its publication plan.

use async_trait::async_trait;
use serde_json::Value;

use super::prompt::PromptBuilder;
use super::session::scope_query;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::{default_plan, Plan};
use crate::result::WorkerResult;
use crate::task::{TaskSpec, TaskType};
use crate::tools::{ToolOutput, ToolParams};

pub struct SopAuthoringWorker;

const TOOLS: &[&str] = &["query_assets"];

/// Plan key carrying the markdown document.
pub const DOCUMENT_KEY: &str = "document";

const MIN_DOCUMENT_LEN: usize = 200;

fn skeleton_document(task: &TaskSpec, plan: &Plan) -> String {
    let mut doc = format!("# SOP: {}\n\n## Scope\n", task.goal);
    match &task.context.asset_filter {
        Some(filter) => doc.push_str(&format!("Assets matching `{}`.\n", filter)),
        None => doc.push_str("All managed assets.\n"),
    }
    doc.push_str("\n## Procedure\n");
    for (i, phase) in plan.phases.iter().enumerate() {
        doc.push_str(&format!("{}. **{}**: {}\n", i + 1, phase.name, phase.description));
    }
    doc.push_str("\n## Rollback\nStop at the first failed step and restore the previous state.\n");
    doc.push_str("\n## Escalation\nPage the owning team's on-call engineer.\n");
    doc
}

fn section_count(document: &str) -> usize {
    document.lines().filter(|l| l.starts_with("## ")).count()
}

#[async_trait]
impl Worker for SopAuthoringWorker {
    fn name(&self) -> &str {
        "sop-author"
    }

    fn description(&self) -> &str {
        "Drafts standard operating procedures grounded in the inventory"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::SopAuthoring]
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
            .optional(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?
            .unwrap_or_default();

        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            ..Default::default()
        });

        let mut fallback = default_plan(task.task_type, assets.len(), risk, &task.constraints);
        let skeleton = skeleton_document(task, &fallback);
        fallback
            .extra
            .insert(DOCUMENT_KEY.to_string(), Value::String(skeleton));

        let prompt = PromptBuilder::for_task(task)
            .section(
                "Output",
                format!(
                    "Besides the plan keys, include the full SOP as markdown under \"{}\" \
                     with Scope, Procedure, Rollback and Escalation sections.",
                    DOCUMENT_KEY
                ),
            )
            .list("Assets in scope", &assets)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;

        let mut quality = score_plan(&resolved.plan);
        let document = resolved.plan.extra_str(DOCUMENT_KEY).unwrap_or_default().to_string();
        if document.len() < MIN_DOCUMENT_LEN {
            session.record_error("generated SOP document is missing or too short");
            quality -= 20.0;
        } else if !document.to_lowercase().contains("rollback") {
            quality -= 10.0;
        }

        let title = document
            .lines()
            .find(|l| l.starts_with("# "))
            .map(|l| l.trim_start_matches("# ").to_string())
            .unwrap_or_else(|| task.goal.clone());

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "SOP drafted: {} ({} sections)",
                title,
                section_count(&document)
            ))
            .affected_assets(assets.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}
