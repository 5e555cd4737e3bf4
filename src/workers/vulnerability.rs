//! Vulnerability response for named CVEs.

use std::collections::BTreeSet;
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
use crate::tools::{Asset, SecurityFinding, ToolOutput, ToolParams};

pub struct VulnerabilityResponseWorker;

const TOOLS: &[&str] = &["query_assets", "get_security_findings", "calculate_risk_score"];

fn cve_pattern() -> &'static Option<Regex> {
    static CVE: OnceLock<Option<Regex>> = OnceLock::new();
    CVE.get_or_init(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").ok())
}

/// CVE identifiers named by the task, upper-cased and deduplicated.
///
/// Looks at the goal, the operator intent and a `cves` list in the
/// constraints.
pub fn cve_ids(task: &TaskSpec) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    if let Some(re) = cve_pattern() {
        for text in [&task.goal, &task.user_intent] {
            ids.extend(re.find_iter(text).map(|m| m.as_str().to_uppercase()));
        }
        if let Some(listed) = task.constraints.extra.get("cves").and_then(|v| v.as_array()) {
            for text in listed.iter().filter_map(|v| v.as_str()) {
                ids.extend(re.find_iter(text).map(|m| m.as_str().to_uppercase()));
            }
        }
    }
    ids
}

#[async_trait]
impl Worker for VulnerabilityResponseWorker {
    fn name(&self) -> &str {
        "vulnerability-responder"
    }

    fn description(&self) -> &str {
        "Scopes exposure to named CVEs and plans patching or mitigation"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::VulnerabilityResponse]
    }

    fn required_tools(&self) -> &[&'static str] {
        TOOLS
    }

    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &ExecutionContext,
    ) -> Result<WorkerResult, WorkerError> {
        let cves = cve_ids(task);
        if cves.is_empty() {
            return Err(WorkerError::InvalidTask(
                "no CVE identifier in goal, intent or constraints".to_string(),
            ));
        }
        let cve_list: Vec<String> = cves.iter().cloned().collect();
        let mut session = Session::new(self.name(), ctx);

        let assets = session
            .essential(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?;
        let in_scope: BTreeSet<&str> = assets.iter().map(|a| a.id.as_str()).collect();

        let findings: Option<Vec<SecurityFinding>> = session
            .optional(
                ToolParams::GetSecurityFindings {
                    filter: task.context.asset_filter.clone(),
                    cves: cve_list.clone(),
                },
                ToolOutput::into_security_findings,
            )
            .await?
            .map(|mut findings| {
                findings.retain(|f| in_scope.contains(f.asset_id.as_str()));
                findings.sort_by(|a, b| b.severity.cmp(&a.severity));
                findings
            });

        // Without scanner data every asset in scope counts as exposed.
        let exposed: Vec<&Asset> = match &findings {
            Some(findings) => {
                let hit: BTreeSet<&str> = findings.iter().map(|f| f.asset_id.as_str()).collect();
                assets.iter().filter(|a| hit.contains(a.id.as_str())).collect()
            }
            None => assets.iter().collect(),
        };

        if exposed.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!(
                    "None of {} assets in scope affected by {}",
                    assets.len(),
                    cve_list.join(", ")
                ))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let findings = findings.unwrap_or_default();
        let unfixed: BTreeSet<&str> = findings
            .iter()
            .filter(|f| f.fixed_in.is_none())
            .filter_map(|f| f.cve.as_deref())
            .collect();
        if !unfixed.is_empty() {
            session.record_error(format!(
                "no fixed version known for {}; mitigation only",
                unfixed.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }

        let exposed_owned: Vec<Asset> = exposed.iter().map(|a| (*a).clone()).collect();
        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(risk_input(task, &exposed_owned, "patch")),
                ToolOutput::into_risk_score,
            )
            .await?;

        let worst = findings.first().map(|f| f.severity).unwrap_or(RiskTier::High);
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: exposed.len(),
            critical_assets: exposed.iter().filter(|a| a.critical).count(),
            engine_score: engine.as_ref(),
            floor: Some(worst),
        });

        let fallback = default_plan(task.task_type, exposed.len(), risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .section("CVEs", cve_list.join(", "))
            .list("Findings", &findings)
            .list("Exposed assets", &exposed_owned)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} affects {} of {} assets (worst severity {})",
                cve_list.join(", "),
                exposed.len(),
                assets.len(),
                worst
            ))
            .affected_assets(exposed.len())
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

    #[test]
    fn test_cve_ids_from_goal_intent_and_constraints() {
        let mut task = TaskSpec::new(
            "acme",
            TaskType::VulnerabilityResponse,
            "Patch cve-2024-5535 and CVE-2024-5535 everywhere",
        );
        task.user_intent = "also CVE-2023-22809 please".to_string();
        task.constraints
            .extra
            .insert("cves".to_string(), serde_json::json!(["CVE-2021-44228", "not-a-cve"]));

        let ids: Vec<String> = cve_ids(&task).into_iter().collect();
        assert_eq!(ids, vec!["CVE-2021-44228", "CVE-2023-22809", "CVE-2024-5535"]);
    }

    #[test]
    fn test_listed_cves_keep_only_the_identifier() {
        let mut task = TaskSpec::new("acme", TaskType::VulnerabilityResponse, "respond");
        task.constraints.extra.insert(
            "cves".to_string(),
            serde_json::json!(["see CVE-2024-5535 note", " cve-2021-44228 "]),
        );

        let ids: Vec<String> = cve_ids(&task).into_iter().collect();
        assert_eq!(ids, vec!["CVE-2021-44228", "CVE-2024-5535"]);
    }

    #[tokio::test]
    async fn test_critical_cve_scopes_exposed_assets() {
        let llm = ScriptedLlm::single(plan_json(2, RiskTier::Critical));
        let ctx = context_with(llm.clone());
        let task = TaskSpec::new(
            "acme",
            TaskType::VulnerabilityResponse,
            "Respond to CVE-2024-5535",
        );

        let result = VulnerabilityResponseWorker.execute(&task, &ctx).await.unwrap();

        assert_eq!(result.status, ResultStatus::PendingApproval);
        assert_eq!(result.risk, RiskTier::Critical);
        assert_eq!(result.affected_assets, 2);
        assert_eq!(
            result.summary,
            "CVE-2024-5535 affects 2 of 10 assets (worst severity critical)"
        );
        assert!(result.hitl_required);
        let prompt = &llm.requests()[0].messages[0].content;
        assert!(prompt.contains("web-3"));
        assert!(!prompt.contains("sudoedit"));
    }

    #[tokio::test]
    async fn test_unaffected_scope_is_a_report() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let task = TaskSpec::new(
            "acme",
            TaskType::VulnerabilityResponse,
            "Are we exposed to CVE-2021-44228?",
        );

        let result = VulnerabilityResponseWorker.execute(&task, &ctx).await.unwrap();
        assert_eq!(result.status, ResultStatus::Completed);
        assert_eq!(result.summary, "None of 10 assets in scope affected by CVE-2021-44228");
    }

    #[tokio::test]
    async fn test_task_without_cve_is_rejected() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let task = TaskSpec::new("acme", TaskType::VulnerabilityResponse, "patch everything");

        let err = VulnerabilityResponseWorker.execute(&task, &ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidTask(_)));
    }
}
