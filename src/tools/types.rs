//! Typed parameters and results for the tool facade.
//!
//! Every tool the workers know about has a dedicated parameter and output
//! variant. `Opaque` exists for tools outside this set and for raw payloads
//! that must flow through untouched for audit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolError;
use crate::task::RiskTier;

/// A managed machine, VM, node or container host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub platform: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_utilization: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Asset selection used by inventory-style tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// An approved (or formerly approved) baseline image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenImage {
    pub id: String,
    pub family: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Candidate,
    #[default]
    Approved,
    Deprecated,
}

/// One asset that deviates from its baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftedAsset {
    pub asset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    pub expected_version: String,
    pub severity: RiskTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub total_assets: usize,
    pub drifted: Vec<DriftedAsset>,
}

impl DriftReport {
    pub fn drift_ratio(&self) -> f64 {
        if self.total_assets == 0 {
            0.0
        } else {
            self.drifted.len() as f64 / self.total_assets as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionComparison {
    pub current: String,
    pub target: String,
    pub is_upgrade: bool,
    pub major_change: bool,
}

/// Input to the external statistical risk engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskInput {
    pub asset_count: usize,
    pub critical_assets: usize,
    pub environment: String,
    pub change_kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    /// 0-100, higher is riskier.
    pub score: f64,
    pub tier: RiskTier,
    #[serde(default)]
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSimulation {
    pub waves: u32,
    pub estimated_duration_minutes: u32,
    pub predicted_failure_rate: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Passing,
    Failing,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResult {
    pub control_id: String,
    pub title: String,
    pub state: ControlState,
    pub severity: RiskTier,
    #[serde(default)]
    pub affected_assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub framework: String,
    pub controls: Vec<ControlResult>,
}

impl ComplianceStatus {
    pub fn failing(&self) -> impl Iterator<Item = &ControlResult> {
        self.controls
            .iter()
            .filter(|c| c.state == ControlState::Failing)
    }

    /// Percentage of controls currently passing.
    pub fn score(&self) -> f64 {
        if self.controls.is_empty() {
            return 100.0;
        }
        let passing = self
            .controls
            .iter()
            .filter(|c| c.state == ControlState::Passing)
            .count();
        passing as f64 * 100.0 / self.controls.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlCheck {
    pub control_id: String,
    pub passed: bool,
    #[serde(default)]
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteRole {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrSite {
    pub name: String,
    pub role: SiteRole,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_lag_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrStatus {
    pub sites: Vec<DrSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpo_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rto_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_drill_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub fingerprint: String,
    pub common_name: String,
    #[serde(default)]
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    #[serde(default)]
    pub sans: Vec<String>,
}

impl Certificate {
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateBinding {
    pub fingerprint: String,
    pub asset_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub severity: RiskTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLineItem {
    pub asset_id: String,
    pub monthly_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_utilization: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub currency: String,
    pub monthly_total: f64,
    pub line_items: Vec<CostLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub id: String,
    pub asset_id: String,
    pub title: String,
    pub severity: RiskTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_in: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsEndpointCheck {
    pub endpoint: String,
    pub valid: bool,
    pub days_remaining: i64,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Parameters for one tool invocation, tagged by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "params", rename_all = "snake_case")]
pub enum ToolParams {
    QueryAssets(AssetQuery),
    GetGoldenImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        family: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },
    GetDriftStatus(AssetQuery),
    CompareVersions {
        current: String,
        target: String,
    },
    CalculateRiskScore(RiskInput),
    SimulateRollout {
        asset_count: usize,
        canary_percentage: f64,
        wave_percentage: f64,
    },
    GetComplianceStatus {
        framework: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    CheckControl {
        framework: String,
        control_id: String,
    },
    GetDrStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site: Option<String>,
    },
    ListCertificates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expiring_within_days: Option<u32>,
    },
    MapCertificateUsage {
        fingerprint: String,
    },
    ListImages {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        family: Option<String>,
    },
    QueryAlerts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_hours: Option<u32>,
    },
    GetCostReport {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    GetSecurityFindings {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cves: Vec<String>,
    },
    ValidateTlsEndpoint {
        endpoint: String,
    },
    /// Tool outside the typed set; parameters pass through untouched.
    Opaque {
        name: String,
        params: Value,
    },
}

impl ToolParams {
    /// Name under which the target tool is registered.
    pub fn tool_name(&self) -> &str {
        match self {
            Self::QueryAssets(_) => "query_assets",
            Self::GetGoldenImage { .. } => "get_golden_image",
            Self::GetDriftStatus(_) => "get_drift_status",
            Self::CompareVersions { .. } => "compare_versions",
            Self::CalculateRiskScore(_) => "calculate_risk_score",
            Self::SimulateRollout { .. } => "simulate_rollout",
            Self::GetComplianceStatus { .. } => "get_compliance_status",
            Self::CheckControl { .. } => "check_control",
            Self::GetDrStatus { .. } => "get_dr_status",
            Self::ListCertificates { .. } => "list_certificates",
            Self::MapCertificateUsage { .. } => "map_certificate_usage",
            Self::ListImages { .. } => "list_images",
            Self::QueryAlerts { .. } => "query_alerts",
            Self::GetCostReport { .. } => "get_cost_report",
            Self::GetSecurityFindings { .. } => "get_security_findings",
            Self::ValidateTlsEndpoint { .. } => "validate_tls_endpoint",
            Self::Opaque { name, .. } => name,
        }
    }
}

/// Result of one tool invocation, tagged by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolOutput {
    Assets(Vec<Asset>),
    GoldenImage(GoldenImage),
    Drift(DriftReport),
    VersionComparison(VersionComparison),
    RiskScore(RiskScore),
    Simulation(RolloutSimulation),
    Compliance(ComplianceStatus),
    Control(ControlCheck),
    DrStatus(DrStatus),
    Certificates(Vec<Certificate>),
    CertificateUsage(Vec<CertificateBinding>),
    Images(Vec<GoldenImage>),
    Alerts(Vec<Alert>),
    Cost(CostReport),
    SecurityFindings(Vec<SecurityFinding>),
    TlsCheck(TlsEndpointCheck),
    Opaque(Value),
}

macro_rules! output_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(self, tool: &str) -> Result<$ty, ToolError> {
            match self {
                ToolOutput::$variant(inner) => Ok(inner),
                other => Err(ToolError::UnexpectedOutput {
                    tool: tool.to_string(),
                    expected: stringify!($variant),
                    actual: other.kind_name(),
                }),
            }
        }
    };
}

impl ToolOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Assets(_) => "Assets",
            Self::GoldenImage(_) => "GoldenImage",
            Self::Drift(_) => "Drift",
            Self::VersionComparison(_) => "VersionComparison",
            Self::RiskScore(_) => "RiskScore",
            Self::Simulation(_) => "Simulation",
            Self::Compliance(_) => "Compliance",
            Self::Control(_) => "Control",
            Self::DrStatus(_) => "DrStatus",
            Self::Certificates(_) => "Certificates",
            Self::CertificateUsage(_) => "CertificateUsage",
            Self::Images(_) => "Images",
            Self::Alerts(_) => "Alerts",
            Self::Cost(_) => "Cost",
            Self::SecurityFindings(_) => "SecurityFindings",
            Self::TlsCheck(_) => "TlsCheck",
            Self::Opaque(_) => "Opaque",
        }
    }

    output_accessor!(into_assets, Assets, Vec<Asset>);
    output_accessor!(into_golden_image, GoldenImage, GoldenImage);
    output_accessor!(into_drift, Drift, DriftReport);
    output_accessor!(into_version_comparison, VersionComparison, VersionComparison);
    output_accessor!(into_risk_score, RiskScore, RiskScore);
    output_accessor!(into_simulation, Simulation, RolloutSimulation);
    output_accessor!(into_compliance, Compliance, ComplianceStatus);
    output_accessor!(into_control, Control, ControlCheck);
    output_accessor!(into_dr_status, DrStatus, DrStatus);
    output_accessor!(into_certificates, Certificates, Vec<Certificate>);
    output_accessor!(into_certificate_usage, CertificateUsage, Vec<CertificateBinding>);
    output_accessor!(into_images, Images, Vec<GoldenImage>);
    output_accessor!(into_alerts, Alerts, Vec<Alert>);
    output_accessor!(into_cost, Cost, CostReport);
    output_accessor!(into_security_findings, SecurityFindings, Vec<SecurityFinding>);
    output_accessor!(into_tls_check, TlsCheck, TlsEndpointCheck);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_serialize_with_tool_tag() {
        let params = ToolParams::CompareVersions {
            current: "1.2.0".to_string(),
            target: "1.3.0".to_string(),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["tool"], "compare_versions");
        assert_eq!(value["params"]["target"], "1.3.0");
        assert_eq!(params.tool_name(), "compare_versions");
    }

    #[test]
    fn test_opaque_params_keep_their_name() {
        let params = ToolParams::Opaque {
            name: "get_site_capacity".to_string(),
            params: serde_json::json!({"site": "fra1"}),
        };
        assert_eq!(params.tool_name(), "get_site_capacity");
    }

    #[test]
    fn test_accessor_reports_shape_mismatch() {
        let output = ToolOutput::Opaque(serde_json::json!({}));
        let err = output.into_assets("query_assets").unwrap_err();
        assert!(err.to_string().contains("expected Assets"));
    }

    #[test]
    fn test_compliance_score() {
        let status = ComplianceStatus {
            framework: "cis".to_string(),
            controls: vec![
                ControlResult {
                    control_id: "1.1".to_string(),
                    title: "ssh root login".to_string(),
                    state: ControlState::Passing,
                    severity: RiskTier::High,
                    affected_assets: vec![],
                },
                ControlResult {
                    control_id: "1.2".to_string(),
                    title: "auditd enabled".to_string(),
                    state: ControlState::Failing,
                    severity: RiskTier::Medium,
                    affected_assets: vec!["web-1".to_string()],
                },
            ],
        };
        assert_eq!(status.score(), 50.0);
        assert_eq!(status.failing().count(), 1);
    }
}
