//! Remediation plans.
//!
//! A [`Plan`] is either generated (recovered from completion output by
//! [`extract`]) or synthesized (built deterministically by [`synth`] or
//! [`defaults`]). Either way it must pass [`Plan::validate`]: at least one
//! phase and an explicit rollback policy with at least one trigger.

pub mod defaults;
pub mod extract;
pub mod synth;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use defaults::{default_plan, PlanCategory};
pub use extract::{
    extract_plan, extract_structured, find_balanced_object, resolve_plan, ExtractError,
    Extraction, ParseOutcome, ResolvedPlan,
};
pub use synth::{synthesize_rollout, RolloutDefaults, RolloutParams, RolloutShape, MAX_WAVES};

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanProvenance {
    Generated,
    Synthesized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Preflight,
    Canary,
    Wave,
    Validation,
    #[default]
    #[serde(other)]
    Step,
}

/// One ordered stage of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub kind: PhaseKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub asset_count: usize,
    /// Cumulative share of the fleet covered once this phase completes.
    #[serde(default, alias = "percentage")]
    pub asset_percentage: f64,
    #[serde(default)]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

impl Phase {
    pub fn step(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PhaseKind::Step,
            description: description.into(),
            asset_count: 0,
            asset_percentage: 0.0,
            rollback_on_failure: false,
            success_criteria: Vec::new(),
            checks: Vec::new(),
            duration_minutes: None,
        }
    }
}

/// Condition that triggers a rollback.
///
/// Generated plans often spell triggers as free text ("error rate > 5%");
/// those are mapped onto the typed variants where possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", from = "TriggerRepr")]
pub enum RollbackTrigger {
    ErrorRate { threshold_percent: f64 },
    HealthCheckFailure,
    Manual,
    Custom { description: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TriggerRepr {
    Tagged(TaggedTrigger),
    Text(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedTrigger {
    ErrorRate {
        #[serde(default = "default_error_threshold", alias = "threshold")]
        threshold_percent: f64,
    },
    HealthCheckFailure,
    Manual,
    Custom {
        description: String,
    },
}

fn default_error_threshold() -> f64 {
    5.0
}

impl From<TriggerRepr> for RollbackTrigger {
    fn from(repr: TriggerRepr) -> Self {
        match repr {
            TriggerRepr::Tagged(TaggedTrigger::ErrorRate { threshold_percent }) => {
                RollbackTrigger::ErrorRate { threshold_percent }
            }
            TriggerRepr::Tagged(TaggedTrigger::HealthCheckFailure) => {
                RollbackTrigger::HealthCheckFailure
            }
            TriggerRepr::Tagged(TaggedTrigger::Manual) => RollbackTrigger::Manual,
            TriggerRepr::Tagged(TaggedTrigger::Custom { description }) => {
                RollbackTrigger::Custom { description }
            }
            TriggerRepr::Text(text) => RollbackTrigger::from_text(&text),
        }
    }
}

impl RollbackTrigger {
    fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("error") {
            let threshold = lower
                .split(|c: char| !(c.is_ascii_digit() || c == '.'))
                .find_map(|tok| tok.parse::<f64>().ok())
                .unwrap_or_else(default_error_threshold);
            RollbackTrigger::ErrorRate {
                threshold_percent: threshold,
            }
        } else if lower.contains("health") {
            RollbackTrigger::HealthCheckFailure
        } else if lower.contains("manual") {
            RollbackTrigger::Manual
        } else {
            RollbackTrigger::Custom {
                description: text.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPolicy {
    #[serde(default = "default_true")]
    pub automatic: bool,
    #[serde(default)]
    pub triggers: Vec<RollbackTrigger>,
    #[serde(default)]
    pub strategy: String,
}

fn default_true() -> bool {
    true
}

/// Channels to notify at each lifecycle point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMatrix {
    #[serde(default)]
    pub on_start: Vec<String>,
    #[serde(default)]
    pub on_phase_complete: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
    #[serde(default)]
    pub on_complete: Vec<String>,
}

impl NotificationMatrix {
    pub fn is_empty(&self) -> bool {
        self.on_start.is_empty()
            && self.on_phase_complete.is_empty()
            && self.on_failure.is_empty()
            && self.on_complete.is_empty()
    }
}

/// A proposed remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(
        default,
        alias = "estimated_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default, alias = "rollback")]
    pub rollback_policy: Option<RollbackPolicy>,
    #[serde(default, alias = "notification_matrix")]
    pub notifications: NotificationMatrix,
    /// Worker-specific payload (generated code, documents, findings).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan has no phases")]
    NoPhases,
    #[error("plan has no rollback policy")]
    MissingRollbackPolicy,
    #[error("rollback policy has no triggers")]
    NoRollbackTriggers,
    #[error("phase {0} has an empty name")]
    UnnamedPhase(usize),
    #[error("phase '{0}' has an asset percentage outside 0-100")]
    PercentageOutOfRange(String),
}

impl Plan {
    /// Check the invariants every returned plan must hold.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.phases.is_empty() {
            return Err(PlanValidationError::NoPhases);
        }
        let policy = self
            .rollback_policy
            .as_ref()
            .ok_or(PlanValidationError::MissingRollbackPolicy)?;
        if policy.triggers.is_empty() {
            return Err(PlanValidationError::NoRollbackTriggers);
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(PlanValidationError::UnnamedPhase(i));
            }
            if !(0.0..=100.0).contains(&phase.asset_percentage) {
                return Err(PlanValidationError::PercentageOutOfRange(phase.name.clone()));
            }
        }
        Ok(())
    }

    pub fn has_canary(&self) -> bool {
        self.phases.iter().any(|p| p.kind == PhaseKind::Canary)
    }

    /// Largest asset count touched by any single phase.
    pub fn max_phase_assets(&self) -> usize {
        self.phases.iter().map(|p| p.asset_count).max().unwrap_or(0)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}
