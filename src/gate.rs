//! Quality/risk scoring and the human-in-the-loop gate.
//!
//! Everything here is a pure function of its inputs. [`crate::result::ResultBuilder`]
//! calls [`cap_quality`] and [`evaluate_hitl`] on every result it builds.

use serde::{Deserialize, Serialize};

use crate::plan::{ParseOutcome, PhaseKind, Plan};
use crate::result::WorkerResult;
use crate::task::{Environment, RiskTier};
use crate::tools::RiskScore;

/// Ceiling on quality for plans that needed text surgery or a fallback.
pub const UNTRUSTED_QUALITY_CAP: f64 = 60.0;

/// Below this score a plan is never auto-approved.
pub const MIN_AUTO_QUALITY: f64 = 50.0;

/// Why a result needs a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HitlReason {
    LowQuality { score: f64 },
    ElevatedRisk { risk: RiskTier },
    UntrustedParse { outcome: ParseOutcome },
    ExecutionErrors { count: usize },
    RequestedByTask,
}

/// Clamp to [0, 100] and apply the provenance cap.
pub fn cap_quality(score: f64, outcome: Option<ParseOutcome>) -> f64 {
    let score = if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    };
    match outcome {
        Some(o) if !o.is_trusted() => score.min(UNTRUSTED_QUALITY_CAP),
        _ => score,
    }
}

/// Every gate rule that matches, in rule order.
pub fn evaluate_hitl(result: &WorkerResult) -> Vec<HitlReason> {
    let mut reasons = Vec::new();
    if result.quality_score < MIN_AUTO_QUALITY {
        reasons.push(HitlReason::LowQuality {
            score: result.quality_score,
        });
    }
    if result.risk.is_elevated() {
        reasons.push(HitlReason::ElevatedRisk { risk: result.risk });
    }
    if let Some(outcome) = result.parse_outcome {
        if matches!(outcome, ParseOutcome::Extracted | ParseOutcome::Lenient) {
            reasons.push(HitlReason::UntrustedParse { outcome });
        }
    }
    if !result.errors.is_empty() {
        reasons.push(HitlReason::ExecutionErrors {
            count: result.errors.len(),
        });
    }
    reasons
}

/// The single chokepoint deciding whether a human must approve.
pub fn should_require_hitl(result: &WorkerResult) -> bool {
    !evaluate_hitl(result).is_empty()
}

/// Completeness/coherence heuristic for a plan, 0-100.
pub fn score_plan(plan: &Plan) -> f64 {
    if plan.phases.is_empty() {
        return 0.0;
    }

    let mut score: f64 = 40.0;

    if plan.phases.iter().all(|p| !p.success_criteria.is_empty()) {
        score += 10.0;
    } else if plan.phases.iter().any(|p| !p.success_criteria.is_empty()) {
        score += 5.0;
    }

    match plan.rollback_policy.as_ref().map(|r| r.triggers.len()) {
        Some(n) if n >= 2 => score += 15.0,
        Some(1) => score += 8.0,
        _ => {}
    }

    if !plan.notifications.is_empty() {
        score += 10.0;
    }
    if plan.estimated_duration_minutes.is_some() {
        score += 5.0;
    }
    if !plan.summary.trim().is_empty() {
        score += 5.0;
    }

    let staged = plan.has_canary() || plan.phases.iter().filter(|p| p.rollback_on_failure).count() > 1;
    if staged {
        score += 10.0;
    }
    if plan
        .phases
        .iter()
        .any(|p| matches!(p.kind, PhaseKind::Preflight | PhaseKind::Validation))
    {
        score += 5.0;
    }

    // Big-bang: one non-reversible change phase touching most of the fleet.
    let big_bang = plan.phases.iter().any(|p| {
        !p.rollback_on_failure
            && matches!(p.kind, PhaseKind::Wave | PhaseKind::Canary | PhaseKind::Step)
            && p.asset_percentage > 50.0
    });
    if big_bang {
        score -= 20.0;
    }

    score.clamp(0.0, 100.0)
}

/// Signals feeding [`assess_risk`].
#[derive(Debug, Clone, Default)]
pub struct RiskSignals<'a> {
    pub hint: Option<RiskTier>,
    pub environment: Option<&'a Environment>,
    pub affected_assets: usize,
    pub critical_assets: usize,
    pub engine_score: Option<&'a RiskScore>,
    /// Minimum tier the worker's change class always carries.
    pub floor: Option<RiskTier>,
}

/// Combine the signals; the highest tier wins.
pub fn assess_risk(signals: &RiskSignals<'_>) -> RiskTier {
    let mut tier = signals.hint.unwrap_or(RiskTier::Low);

    if let Some(score) = signals.engine_score {
        tier = tier.max(score.tier);
    }
    if let Some(floor) = signals.floor {
        tier = tier.max(floor);
    }

    let production = signals.environment.map_or(false, Environment::is_production);
    if production {
        tier = tier.max(RiskTier::Medium);
        if signals.critical_assets > 0 {
            tier = tier.max(RiskTier::High);
        }
    }
    if signals.affected_assets > 500 {
        tier = tier.max(RiskTier::High);
    }

    tier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;
    use crate::plan::{synthesize_rollout, Phase, RolloutParams};
    use crate::result::ResultStatus;
    use crate::task::TaskType;
    use chrono::Utc;
    use uuid::Uuid;

    fn result(quality: f64, risk: RiskTier, outcome: ParseOutcome, errors: usize) -> WorkerResult {
        WorkerResult {
            task_id: Uuid::new_v4(),
            task_type: TaskType::PatchRollout,
            worker: "patch-worker".to_string(),
            status: ResultStatus::PendingApproval,
            plan: None,
            provenance: None,
            parse_outcome: Some(outcome),
            summary: String::new(),
            affected_assets: 10,
            risk,
            quality_score: quality,
            token_usage: TokenUsage::default(),
            evidence: Vec::new(),
            tool_invocations: Vec::new(),
            errors: (0..errors).map(|i| format!("error {}", i)).collect(),
            actions: Vec::new(),
            hitl_required: false,
            hitl_reasons: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reference_examples() {
        assert!(!should_require_hitl(&result(87.5, RiskTier::Medium, ParseOutcome::Direct, 0)));
        assert!(should_require_hitl(&result(95.0, RiskTier::Low, ParseOutcome::Extracted, 0)));
    }

    #[test]
    fn test_hitl_monotonicity() {
        let qualities = [0.0, 49.9, 50.0, 75.0, 100.0];
        let risks = [RiskTier::Low, RiskTier::Medium, RiskTier::High, RiskTier::Critical];
        let outcomes = [ParseOutcome::Direct, ParseOutcome::Extracted, ParseOutcome::Lenient];
        for &q in &qualities {
            for &r in &risks {
                for &o in &outcomes {
                    for errors in [0usize, 1] {
                        let expected = q < 50.0 || r.is_elevated() || o != ParseOutcome::Direct || errors > 0;
                        assert_eq!(
                            should_require_hitl(&result(q, r, o, errors)),
                            expected,
                            "q={} r={} o={} e={}",
                            q,
                            r,
                            o,
                            errors
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_reasons_follow_rule_order() {
        let reasons = evaluate_hitl(&result(10.0, RiskTier::Critical, ParseOutcome::Lenient, 2));
        assert_eq!(
            reasons,
            vec![
                HitlReason::LowQuality { score: 10.0 },
                HitlReason::ElevatedRisk {
                    risk: RiskTier::Critical
                },
                HitlReason::UntrustedParse {
                    outcome: ParseOutcome::Lenient
                },
                HitlReason::ExecutionErrors { count: 2 },
            ]
        );
    }

    #[test]
    fn test_quality_cap() {
        for raw in [-5.0, 0.0, 59.0, 60.0, 61.0, 99.0, 250.0, f64::NAN] {
            let capped = cap_quality(raw, Some(ParseOutcome::Extracted));
            assert!(capped <= 60.0 && capped >= 0.0);
            assert!(cap_quality(raw, Some(ParseOutcome::Lenient)) <= 60.0);
        }
        assert_eq!(cap_quality(87.5, Some(ParseOutcome::Direct)), 87.5);
        assert_eq!(cap_quality(87.5, None), 87.5);
        assert_eq!(cap_quality(140.0, Some(ParseOutcome::Direct)), 100.0);
    }

    #[test]
    fn test_synthesized_plans_score_well() {
        let plan = synthesize_rollout(&RolloutParams::new(200, RiskTier::Medium));
        assert!(score_plan(&plan) >= 90.0);
    }

    #[test]
    fn test_big_bang_plan_scores_poorly() {
        let mut phase = Phase::step("apply everywhere", "patch all assets at once");
        phase.asset_percentage = 100.0;
        phase.asset_count = 400;
        let plan = Plan {
            summary: String::new(),
            phases: vec![phase],
            estimated_duration_minutes: None,
            rollback_policy: None,
            notifications: Default::default(),
            extra: Default::default(),
        };
        assert!(score_plan(&plan) < MIN_AUTO_QUALITY);
    }

    #[test]
    fn test_risk_assessment() {
        let prod = Environment::Production;
        assert_eq!(assess_risk(&RiskSignals::default()), RiskTier::Low);
        assert_eq!(
            assess_risk(&RiskSignals {
                environment: Some(&prod),
                ..Default::default()
            }),
            RiskTier::Medium
        );
        assert_eq!(
            assess_risk(&RiskSignals {
                environment: Some(&prod),
                critical_assets: 1,
                ..Default::default()
            }),
            RiskTier::High
        );
        let engine = RiskScore {
            score: 91.0,
            tier: RiskTier::Critical,
            factors: vec![],
        };
        assert_eq!(
            assess_risk(&RiskSignals {
                hint: Some(RiskTier::Low),
                engine_score: Some(&engine),
                ..Default::default()
            }),
            RiskTier::Critical
        );
        assert_eq!(
            assess_risk(&RiskSignals {
                affected_assets: 501,
                ..Default::default()
            }),
            RiskTier::High
        );
    }
}
