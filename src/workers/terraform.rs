//! Infrastructure-code generation with static review of the generated code.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::prompt::PromptBuilder;
use super::session::{risk_input, scope_query};
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{ToolOutput, ToolParams};

pub struct TerraformGenerationWorker;

const TOOLS: &[&str] = &["query_assets", "calculate_risk_score"];

/// Plan key carrying the generated code.
pub const CODE_KEY: &str = "terraform";

/// Review rule over generated code.
struct ReviewRule {
    name: &'static str,
    regex: Regex,
    /// Destructive findings raise the risk floor.
    destructive: bool,
}

fn review_rules() -> &'static Vec<ReviewRule> {
    static RULES: OnceLock<Vec<ReviewRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            ("force_destroy enabled", r"force_destroy\s*=\s*true", true),
            ("prevent_destroy disabled", r"prevent_destroy\s*=\s*false", true),
            ("deletion protection disabled", r"deletion_protection\s*=\s*false", true),
            ("skip_final_snapshot enabled", r"skip_final_snapshot\s*=\s*true", true),
            (
                "hardcoded credential",
                r#"(?i)\b(password|secret|secret_key|access_key|token)\s*=\s*"[^"$]+""#,
                false,
            ),
            ("world-open ingress", r#"0\.0\.0\.0/0"#, false),
        ]
        .into_iter()
        .filter_map(|(name, pattern, destructive)| {
            Regex::new(pattern).ok().map(|regex| ReviewRule {
                name,
                regex,
                destructive,
            })
        })
        .collect()
    })
}

fn resource_pattern() -> &'static Option<Regex> {
    static RESOURCE: OnceLock<Option<Regex>> = OnceLock::new();
    RESOURCE.get_or_init(|| Regex::new(r#"(?m)^\s*resource\s+"[\w-]+"\s+"[\w-]+""#).ok())
}

/// Findings of the static review.
#[derive(Debug, Default, PartialEq)]
pub struct CodeReview {
    pub resources: usize,
    pub findings: Vec<&'static str>,
    pub destructive: bool,
}

pub fn review_code(code: &str) -> CodeReview {
    let mut review = CodeReview {
        resources: resource_pattern()
            .as_ref()
            .map_or(0, |re| re.find_iter(code).count()),
        ..Default::default()
    };
    for rule in review_rules() {
        if rule.regex.is_match(code) {
            review.findings.push(rule.name);
            review.destructive |= rule.destructive;
        }
    }
    review
}

#[async_trait]
impl Worker for TerraformGenerationWorker {
    fn name(&self) -> &str {
        "terraform-generator"
    }

    fn description(&self) -> &str {
        "Generates infrastructure code from inventory context and reviews it"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::TerraformGeneration]
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
        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(risk_input(task, &assets, "terraform")),
                ToolOutput::into_risk_score,
            )
            .await?;

        let base_risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: assets.len(),
            critical_assets: assets.iter().filter(|a| a.critical).count(),
            engine_score: engine.as_ref(),
            floor: Some(RiskTier::Medium),
        });

        let fallback = default_plan(task.task_type, assets.len(), base_risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .section(
                "Output",
                format!(
                    "Besides the plan keys, include the complete Terraform configuration as a \
                     string under \"{}\". Use variables for every credential.",
                    CODE_KEY
                ),
            )
            .list("Assets in scope", &assets)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let mut quality = score_plan(&resolved.plan);

        let review = match resolved.plan.extra_str(CODE_KEY) {
            Some(code) if !code.trim().is_empty() => review_code(code),
            _ => {
                session.record_error("no infrastructure code generated; manual authoring required");
                quality -= 30.0;
                CodeReview::default()
            }
        };
        for finding in &review.findings {
            session.record_error(format!("code review: {}", finding));
        }
        quality -= 10.0 * review.findings.len() as f64;

        let risk = if review.destructive {
            base_risk.max(RiskTier::High)
        } else {
            base_risk
        };

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "Generated {} resource blocks for {} assets; {} review findings",
                review.resources,
                assets.len(),
                review.findings.len()
            ))
            .affected_assets(assets.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}
