//! Task specification types.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of task types. Adding one requires a new worker and its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DriftRemediation,
    PatchRollout,
    ComplianceAudit,
    IncidentInvestigation,
    DrDrill,
    CostOptimization,
    SecurityScan,
    ImageManagement,
    SopAuthoring,
    TerraformGeneration,
    CertificateRotation,
    VulnerabilityResponse,
}

impl TaskType {
    pub const ALL: [TaskType; 12] = [
        TaskType::DriftRemediation,
        TaskType::PatchRollout,
        TaskType::ComplianceAudit,
        TaskType::IncidentInvestigation,
        TaskType::DrDrill,
        TaskType::CostOptimization,
        TaskType::SecurityScan,
        TaskType::ImageManagement,
        TaskType::SopAuthoring,
        TaskType::TerraformGeneration,
        TaskType::CertificateRotation,
        TaskType::VulnerabilityResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriftRemediation => "drift_remediation",
            Self::PatchRollout => "patch_rollout",
            Self::ComplianceAudit => "compliance_audit",
            Self::IncidentInvestigation => "incident_investigation",
            Self::DrDrill => "dr_drill",
            Self::CostOptimization => "cost_optimization",
            Self::SecurityScan => "security_scan",
            Self::ImageManagement => "image_management",
            Self::SopAuthoring => "sop_authoring",
            Self::TerraformGeneration => "terraform_generation",
            Self::CertificateRotation => "certificate_rotation",
            Self::VulnerabilityResponse => "vulnerability_response",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing a task type that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskType(pub String);

impl FromStr for TaskType {
    type Err = UnknownTaskType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTaskType(s.to_string()))
    }
}

/// Target environment of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Staging,
    Production,
    #[serde(untagged)]
    Other(String),
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk tier, shared by task hints, plans and results.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// High and critical changes always require a human decision.
    pub fn is_elevated(&self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical)
    }

    /// Map a 0-100 numeric risk score onto a tier.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => RiskTier::Critical,
            s if s >= 60.0 => RiskTier::High,
            s if s >= 30.0 => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Scoping context for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    /// Filter expression understood by the asset inventory (e.g. `role=web`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_filter: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Rollout and execution constraints supplied by the caller.
///
/// Known keys are typed; anything else is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_canary: Option<bool>,
    /// Run the worker in report-only mode (no plan, no infrastructure change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Constraints {
    pub fn is_validate_only(&self) -> bool {
        self.validate_only.unwrap_or(false)
    }
}

/// One unit of work handed to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub org_id: String,
    #[serde(default)]
    pub user_id: String,
    pub task_type: TaskType,
    pub goal: String,
    #[serde(default)]
    pub user_intent: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskTier>,
    #[serde(default)]
    pub hitl_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub constraints: Constraints,
}

impl TaskSpec {
    pub fn new(org_id: impl Into<String>, task_type: TaskType, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            user_id: String::new(),
            task_type,
            goal: goal.into(),
            user_intent: String::new(),
            environment: Environment::default(),
            context: TaskContext::default(),
            risk_level: None,
            hitl_required: false,
            timeout_secs: None,
            constraints: Constraints::default(),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_asset_filter(mut self, filter: impl Into<String>) -> Self {
        self.context.asset_filter = Some(filter.into());
        self
    }

    pub fn with_risk_level(mut self, risk: RiskTier) -> Self {
        self.risk_level = Some(risk);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Goal and intent joined for prompt embedding.
    pub fn describe_goal(&self) -> String {
        if self.user_intent.trim().is_empty() {
            self.goal.clone()
        } else {
            format!("{}\n\nOperator intent: {}", self.goal, self.user_intent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_round_trips_through_str() {
        for t in TaskType::ALL {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
        assert!("reboot_everything".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_task_spec_deserializes_with_extra_constraints() {
        let json = r#"{
            "org_id": "acme",
            "task_type": "patch_rollout",
            "goal": "Roll out kernel 6.8",
            "environment": "production",
            "constraints": {"canary_percentage": 3, "change_ticket": "CHG-42"}
        }"#;
        let spec: TaskSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.task_type, TaskType::PatchRollout);
        assert!(spec.environment.is_production());
        assert_eq!(spec.constraints.canary_percentage, Some(3.0));
        assert_eq!(
            spec.constraints.extra.get("change_ticket").and_then(|v| v.as_str()),
            Some("CHG-42")
        );
    }

    #[test]
    fn test_unknown_environment_is_preserved() {
        let env: Environment = serde_json::from_str("\"qa-east\"").unwrap();
        assert_eq!(env, Environment::Other("qa-east".to_string()));
        assert!(!env.is_production());
    }

    #[test]
    fn test_risk_tier_from_score() {
        assert_eq!(RiskTier::from_score(10.0), RiskTier::Low);
        assert_eq!(RiskTier::from_score(45.0), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(65.0), RiskTier::High);
        assert_eq!(RiskTier::from_score(99.0), RiskTier::Critical);
        assert!(RiskTier::High.is_elevated());
        assert!(!RiskTier::Medium.is_elevated());
    }
}
