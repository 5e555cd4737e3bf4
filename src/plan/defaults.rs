//! Default plan by task category.
//!
//! Every worker falls back through [`default_plan`] when the generated plan
//! cannot be recovered, so fallback plans share one shape per category and
//! always carry the standard rollback policy.

use serde::{Deserialize, Serialize};

use super::synth::{standard_notifications, standard_rollback_policy};
use super::{synthesize_rollout, Phase, PhaseKind, Plan, RolloutParams};
use crate::task::{Constraints, RiskTier, TaskType};

/// Shape family of a fallback plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanCategory {
    /// Change applied across assets in canary + waves
    Rollout,
    /// Findings reviewed, then remediated in batches
    Assessment,
    /// Controlled failover and failback
    Failover,
    /// Document or code drafted, reviewed and dry-run
    Authoring,
    /// Evidence gathering only
    Investigation,
}

impl From<TaskType> for PlanCategory {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::DriftRemediation
            | TaskType::PatchRollout
            | TaskType::VulnerabilityResponse
            | TaskType::ImageManagement
            | TaskType::CertificateRotation
            | TaskType::SecurityScan => PlanCategory::Rollout,
            TaskType::ComplianceAudit | TaskType::CostOptimization => PlanCategory::Assessment,
            TaskType::DrDrill => PlanCategory::Failover,
            TaskType::SopAuthoring | TaskType::TerraformGeneration => PlanCategory::Authoring,
            TaskType::IncidentInvestigation => PlanCategory::Investigation,
        }
    }
}

fn step(name: &str, description: &str, rollback: bool, criteria: &[&str]) -> Phase {
    Phase {
        rollback_on_failure: rollback,
        success_criteria: criteria.iter().map(|c| c.to_string()).collect(),
        ..Phase::step(name, description)
    }
}

/// Deterministic, safety-biased plan for a task type.
pub fn default_plan(
    task_type: TaskType,
    asset_count: usize,
    risk: RiskTier,
    constraints: &Constraints,
) -> Plan {
    let category = PlanCategory::from(task_type);
    let mut plan = match category {
        PlanCategory::Rollout => {
            synthesize_rollout(&RolloutParams::new(asset_count, risk).with_constraints(constraints))
        }
        PlanCategory::Assessment => {
            let mut phases = vec![step(
                "review findings",
                "Confirm each finding against live state before any change",
                false,
                &["every finding confirmed or dismissed"],
            )];
            let mut rollout = synthesize_rollout(
                &RolloutParams::new(asset_count, risk).with_constraints(constraints),
            );
            phases.extend(
                rollout
                    .phases
                    .drain(..)
                    .filter(|p| p.kind != PhaseKind::Preflight),
            );
            templated(phases, risk)
        }
        PlanCategory::Failover => templated(
            vec![
                step(
                    "verify replication",
                    "Confirm replication lag is within RPO on every secondary site",
                    false,
                    &["replication lag within RPO"],
                ),
                step(
                    "fail over",
                    "Promote the secondary site and redirect traffic",
                    true,
                    &["traffic served from secondary within RTO"],
                ),
                step(
                    "validate secondary",
                    "Run synthetic checks against services on the secondary site",
                    true,
                    &["synthetic checks green"],
                ),
                step(
                    "fail back",
                    "Return traffic to the primary site and re-establish replication",
                    true,
                    &["primary serving traffic", "replication re-established"],
                ),
            ],
            risk,
        ),
        PlanCategory::Authoring => templated(
            vec![
                step("draft", "Produce the first draft from inventory context", false, &[
                    "draft covers every asset group in scope",
                ]),
                step("peer review", "Route the draft to the owning team for review", false, &[
                    "review approved",
                ]),
                step("dry run", "Exercise the draft against staging without applying changes", true, &[
                    "dry run reports no destructive changes",
                ]),
                step("publish", "Publish the reviewed artifact", true, &["artifact published"]),
            ],
            risk,
        ),
        PlanCategory::Investigation => templated(
            vec![
                step("collect evidence", "Gather alerts, drift and recent changes", false, &[
                    "evidence collected for every affected asset",
                ]),
                step("correlate", "Correlate evidence into a probable cause", false, &[]),
                step("report", "Publish findings to the incident channel", false, &[]),
            ],
            risk,
        ),
    };

    plan.summary = format!(
        "Fallback {} plan for {} ({} assets). {}",
        category_label(category),
        task_type,
        asset_count,
        plan.summary
    )
    .trim_end()
    .to_string();
    plan
}

fn category_label(category: PlanCategory) -> &'static str {
    match category {
        PlanCategory::Rollout => "rollout",
        PlanCategory::Assessment => "assessment",
        PlanCategory::Failover => "failover",
        PlanCategory::Authoring => "authoring",
        PlanCategory::Investigation => "investigation",
    }
}

fn templated(phases: Vec<Phase>, risk: RiskTier) -> Plan {
    let estimated = phases
        .iter()
        .map(|p| p.duration_minutes.unwrap_or(30))
        .sum();
    Plan {
        summary: String::new(),
        phases,
        estimated_duration_minutes: Some(estimated),
        rollback_policy: Some(standard_rollback_policy(risk)),
        notifications: standard_notifications(),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_task_type_has_a_valid_default() {
        for task_type in TaskType::ALL {
            for assets in [0usize, 1, 40, 5000] {
                let plan = default_plan(task_type, assets, RiskTier::High, &Constraints::default());
                assert!(plan.validate().is_ok(), "{} with {} assets", task_type, assets);
                assert!(plan.summary.starts_with("Fallback"));
            }
        }
    }

    #[test]
    fn test_rollout_category_uses_synthesizer() {
        let plan = default_plan(
            TaskType::PatchRollout,
            100,
            RiskTier::Medium,
            &Constraints::default(),
        );
        assert_eq!(plan.phases.first().map(|p| p.kind), Some(PhaseKind::Preflight));
        assert!(plan.has_canary());
    }

    #[test]
    fn test_assessment_category_keeps_staged_remediation() {
        let plan = default_plan(
            TaskType::ComplianceAudit,
            100,
            RiskTier::Medium,
            &Constraints::default(),
        );
        assert_eq!(plan.phases[0].name, "review findings");
        assert!(plan.has_canary());
        assert!(plan.phases.iter().all(|p| p.kind != PhaseKind::Preflight));
    }

    #[test]
    fn test_categories() {
        assert_eq!(PlanCategory::from(TaskType::DrDrill), PlanCategory::Failover);
        assert_eq!(
            PlanCategory::from(TaskType::TerraformGeneration),
            PlanCategory::Authoring
        );
        assert_eq!(
            PlanCategory::from(TaskType::IncidentInvestigation),
            PlanCategory::Investigation
        );
    }
}
