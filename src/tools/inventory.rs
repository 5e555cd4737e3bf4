//! Tools answering from an in-memory fleet snapshot.
//!
//! The snapshot is a point-in-time export of the inventory (assets, golden
//! images, compliance, DR, certificates, alerts, findings). It backs local
//! runs and tests; production deployments point the registry at the
//! inventory service through [`super::remote`] instead.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::*;
use super::{Tool, ToolError, ToolRegistry, KNOWN_TOOLS};
use crate::plan::RolloutShape;
use crate::task::RiskTier;

/// Point-in-time view of the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub golden_images: Vec<GoldenImage>,
    #[serde(default)]
    pub compliance: Vec<ComplianceStatus>,
    #[serde(default)]
    pub control_checks: Vec<ControlCheck>,
    #[serde(default)]
    pub dr: Option<DrStatus>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub certificate_bindings: Vec<CertificateBinding>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub security_findings: Vec<SecurityFinding>,
    #[serde(default)]
    pub tls_endpoints: Vec<TlsEndpointCheck>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl FleetSnapshot {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot = Self::from_yaml_str(&contents)?;
        tracing::info!(
            "Loaded fleet snapshot from {} ({} assets, {} images)",
            path.display(),
            snapshot.assets.len(),
            snapshot.golden_images.len()
        );
        Ok(snapshot)
    }

    /// Register one snapshot-backed tool per known tool name.
    pub fn register_tools(self: Arc<Self>, registry: &mut ToolRegistry) {
        for name in KNOWN_TOOLS {
            registry.register(Arc::new(SnapshotTool {
                name,
                snapshot: Arc::clone(&self),
            }));
        }
    }

    pub fn query_assets(&self, query: &AssetQuery) -> Result<Vec<Asset>, ToolError> {
        let filter = match &query.filter {
            Some(expr) => AssetFilter::parse(expr).map_err(|message| ToolError::InvalidParams {
                tool: "query_assets".to_string(),
                message,
            })?,
            None => AssetFilter::default(),
        };

        let mut matched: Vec<Asset> = self
            .assets
            .iter()
            .filter(|a| filter.matches(a))
            .filter(|a| query.platforms.is_empty() || query.platforms.contains(&a.platform))
            .filter(|a| query.regions.is_empty() || query.regions.contains(&a.region))
            .filter(|a| {
                query
                    .environment
                    .as_ref()
                    .map_or(true, |env| a.environment.eq_ignore_ascii_case(env))
            })
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    /// Latest approved image, optionally restricted to a family and platform.
    pub fn latest_golden(&self, family: Option<&str>, platform: Option<&str>) -> Option<&GoldenImage> {
        self.golden_images
            .iter()
            .filter(|img| img.status == ImageStatus::Approved)
            .filter(|img| family.map_or(true, |f| img.family == f))
            .filter(|img| {
                platform.map_or(true, |p| img.platform.as_deref().map_or(true, |ip| ip == p))
            })
            .max_by(|a, b| compare_version_strings(&a.version, &b.version))
    }

    pub fn drift(&self, query: &AssetQuery) -> Result<DriftReport, ToolError> {
        let assets = self.query_assets(query)?;
        let mut drifted = Vec::new();

        for asset in &assets {
            let Some(family) = asset.image_family.as_deref() else {
                continue;
            };
            let Some(golden) = self.latest_golden(Some(family), None) else {
                continue;
            };
            let current = asset.image_version.clone();
            if current.as_deref() == Some(golden.version.as_str()) {
                continue;
            }

            let mut severity = match current.as_deref() {
                None => RiskTier::High,
                Some(v) if major_of(v) != major_of(&golden.version) => RiskTier::High,
                Some(_) => RiskTier::Medium,
            };
            if asset.critical && severity < RiskTier::Critical {
                severity = match severity {
                    RiskTier::Low => RiskTier::Medium,
                    RiskTier::Medium => RiskTier::High,
                    _ => RiskTier::Critical,
                };
            }

            drifted.push(DriftedAsset {
                asset_id: asset.id.clone(),
                current_version: current,
                expected_version: golden.version.clone(),
                severity,
            });
        }

        Ok(DriftReport {
            total_assets: assets.len(),
            drifted,
        })
    }

    fn cost_report(&self, filter: Option<&str>) -> Result<CostReport, ToolError> {
        let assets = self.query_assets(&AssetQuery {
            filter: filter.map(str::to_string),
            ..Default::default()
        })?;
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
        Ok(CostReport {
            currency: self.currency.clone(),
            monthly_total: line_items.iter().map(|i| i.monthly_cost).sum(),
            line_items,
        })
    }

    fn asset_ids_matching(&self, filter: Option<&str>) -> Result<Option<Vec<String>>, ToolError> {
        match filter {
            Some(expr) => {
                let assets = self.query_assets(&AssetQuery {
                    filter: Some(expr.to_string()),
                    ..Default::default()
                })?;
                Ok(Some(assets.into_iter().map(|a| a.id).collect()))
            }
            None => Ok(None),
        }
    }

    fn tls_check(&self, endpoint: &str) -> Result<TlsEndpointCheck, ToolError> {
        if let Some(check) = self.tls_endpoints.iter().find(|c| c.endpoint == endpoint) {
            return Ok(check.clone());
        }

        let binding = self
            .certificate_bindings
            .iter()
            .find(|b| b.endpoint == endpoint)
            .ok_or_else(|| {
                ToolError::failed("validate_tls_endpoint", format!("unknown endpoint {}", endpoint))
            })?;
        let cert = self
            .certificates
            .iter()
            .find(|c| c.fingerprint == binding.fingerprint)
            .ok_or_else(|| {
                ToolError::failed(
                    "validate_tls_endpoint",
                    format!("no certificate {} for {}", binding.fingerprint, endpoint),
                )
            })?;

        let days_remaining = cert.days_until_expiry(Utc::now());
        let mut issues = Vec::new();
        if days_remaining <= 0 {
            issues.push("certificate expired".to_string());
        } else if days_remaining <= 30 {
            issues.push(format!("certificate expires in {} days", days_remaining));
        }
        Ok(TlsEndpointCheck {
            endpoint: endpoint.to_string(),
            valid: days_remaining > 0,
            days_remaining,
            protocol: "TLSv1.3".to_string(),
            issues,
        })
    }

    fn answer(&self, params: &ToolParams) -> Result<ToolOutput, ToolError> {
        let output = match params {
            ToolParams::QueryAssets(query) => ToolOutput::Assets(self.query_assets(query)?),
            ToolParams::GetGoldenImage { family, platform } => ToolOutput::GoldenImage(
                self.latest_golden(family.as_deref(), platform.as_deref())
                    .cloned()
                    .ok_or_else(|| {
                        ToolError::failed(
                            "get_golden_image",
                            format!("no approved image for family {:?}", family),
                        )
                    })?,
            ),
            ToolParams::GetDriftStatus(query) => ToolOutput::Drift(self.drift(query)?),
            ToolParams::CompareVersions { current, target } => {
                ToolOutput::VersionComparison(compare_versions(current, target))
            }
            ToolParams::CalculateRiskScore(input) => ToolOutput::RiskScore(score_risk(input)),
            ToolParams::SimulateRollout {
                asset_count,
                canary_percentage,
                wave_percentage,
            } => ToolOutput::Simulation(simulate_rollout(
                *asset_count,
                *canary_percentage,
                *wave_percentage,
            )),
            ToolParams::GetComplianceStatus { framework, filter } => {
                let status = self
                    .compliance
                    .iter()
                    .find(|c| c.framework.eq_ignore_ascii_case(framework))
                    .cloned()
                    .ok_or_else(|| {
                        ToolError::failed(
                            "get_compliance_status",
                            format!("framework {} not assessed", framework),
                        )
                    })?;
                ToolOutput::Compliance(self.restrict_compliance(status, filter.as_deref())?)
            }
            ToolParams::CheckControl {
                framework,
                control_id,
            } => ToolOutput::Control(self.check_control(framework, control_id)?),
            ToolParams::GetDrStatus { site } => {
                let mut status = self.dr.clone().ok_or_else(|| {
                    ToolError::failed("get_dr_status", "no DR configuration recorded")
                })?;
                if let Some(site) = site {
                    status.sites.retain(|s| &s.name == site);
                }
                ToolOutput::DrStatus(status)
            }
            ToolParams::ListCertificates {
                expiring_within_days,
            } => {
                let cutoff = expiring_within_days.map(|d| Utc::now() + Duration::days(d as i64));
                let mut certs: Vec<Certificate> = self
                    .certificates
                    .iter()
                    .filter(|c| cutoff.map_or(true, |cutoff| c.not_after <= cutoff))
                    .cloned()
                    .collect();
                certs.sort_by_key(|c| c.not_after);
                ToolOutput::Certificates(certs)
            }
            ToolParams::MapCertificateUsage { fingerprint } => ToolOutput::CertificateUsage(
                self.certificate_bindings
                    .iter()
                    .filter(|b| &b.fingerprint == fingerprint)
                    .cloned()
                    .collect(),
            ),
            ToolParams::ListImages { family } => {
                let mut images: Vec<GoldenImage> = self
                    .golden_images
                    .iter()
                    .filter(|img| family.as_ref().map_or(true, |f| &img.family == f))
                    .cloned()
                    .collect();
                images.sort_by(|a, b| {
                    a.family
                        .cmp(&b.family)
                        .then_with(|| compare_version_strings(&b.version, &a.version))
                });
                ToolOutput::Images(images)
            }
            ToolParams::QueryAlerts {
                filter,
                since_hours,
            } => {
                let ids = self.asset_ids_matching(filter.as_deref())?;
                let since = since_hours.map(|h| Utc::now() - Duration::hours(h as i64));
                let alerts = self
                    .alerts
                    .iter()
                    .filter(|a| since.map_or(true, |s| a.raised_at >= s))
                    .filter(|a| match (&ids, &a.asset_id) {
                        (None, _) => true,
                        (Some(ids), Some(asset)) => ids.contains(asset),
                        (Some(_), None) => false,
                    })
                    .cloned()
                    .collect();
                ToolOutput::Alerts(alerts)
            }
            ToolParams::GetCostReport { filter } => {
                ToolOutput::Cost(self.cost_report(filter.as_deref())?)
            }
            ToolParams::GetSecurityFindings { filter, cves } => {
                let ids = self.asset_ids_matching(filter.as_deref())?;
                let findings = self
                    .security_findings
                    .iter()
                    .filter(|f| ids.as_ref().map_or(true, |ids| ids.contains(&f.asset_id)))
                    .filter(|f| {
                        cves.is_empty()
                            || f.cve
                                .as_ref()
                                .map_or(false, |c| cves.iter().any(|want| want.eq_ignore_ascii_case(c)))
                    })
                    .cloned()
                    .collect();
                ToolOutput::SecurityFindings(findings)
            }
            ToolParams::ValidateTlsEndpoint { endpoint } => {
                ToolOutput::TlsCheck(self.tls_check(endpoint)?)
            }
            ToolParams::Opaque { name, .. } => {
                return Err(ToolError::NotFound(name.clone()));
            }
        };
        Ok(output)
    }

    fn restrict_compliance(
        &self,
        mut status: ComplianceStatus,
        filter: Option<&str>,
    ) -> Result<ComplianceStatus, ToolError> {
        if let Some(ids) = self.asset_ids_matching(filter)? {
            for control in &mut status.controls {
                control.affected_assets.retain(|a| ids.contains(a));
                if control.state == ControlState::Failing && control.affected_assets.is_empty() {
                    control.state = ControlState::Passing;
                }
            }
        }
        Ok(status)
    }

    fn check_control(&self, framework: &str, control_id: &str) -> Result<ControlCheck, ToolError> {
        if let Some(check) = self.control_checks.iter().find(|c| c.control_id == control_id) {
            return Ok(check.clone());
        }
        let control = self
            .compliance
            .iter()
            .filter(|c| c.framework.eq_ignore_ascii_case(framework))
            .flat_map(|c| c.controls.iter())
            .find(|c| c.control_id == control_id)
            .ok_or_else(|| {
                ToolError::failed("check_control", format!("unknown control {}", control_id))
            })?;
        Ok(ControlCheck {
            control_id: control.control_id.clone(),
            passed: control.state == ControlState::Passing,
            evidence: format!("{} affected assets", control.affected_assets.len()),
            remediation: None,
        })
    }
}

/// One snapshot-backed tool.
pub struct SnapshotTool {
    name: &'static str,
    snapshot: Arc<FleetSnapshot>,
}

#[async_trait]
impl Tool for SnapshotTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Answers from the loaded fleet snapshot"
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolOutput, ToolError> {
        if params.tool_name() != self.name {
            return Err(ToolError::InvalidParams {
                tool: self.name.to_string(),
                message: format!("parameters addressed to {}", params.tool_name()),
            });
        }
        self.snapshot.answer(params)
    }
}

/// Parsed asset filter expression such as `role=web, region=eu-*`.
///
/// Clauses are joined with `,`, `;` or ` and `. A trailing `*` turns a value
/// into a prefix match and `!=` negates a clause. Unknown keys match tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetFilter {
    clauses: Vec<FilterClause>,
}

#[derive(Debug, Clone, PartialEq)]
struct FilterClause {
    key: String,
    value: String,
    negate: bool,
}

impl AssetFilter {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let normalized = expr.replace(" and ", ",").replace(" AND ", ",");
        let mut clauses = Vec::new();
        for raw in normalized.split([',', ';']) {
            let raw = raw.trim();
            if raw.is_empty() || raw == "*" {
                continue;
            }
            let (key, value, negate) = if let Some((k, v)) = raw.split_once("!=") {
                (k, v, true)
            } else if let Some((k, v)) = raw.split_once('=') {
                (k, v, false)
            } else {
                return Err(format!("clause '{}' is not key=value", raw));
            };
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(format!("clause '{}' has an empty key", raw));
            }
            clauses.push(FilterClause {
                key,
                value: value.trim().trim_matches('"').to_string(),
                negate,
            });
        }
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        self.clauses.iter().all(|clause| {
            let actual: Option<String> = match clause.key.as_str() {
                "id" => Some(asset.id.clone()),
                "name" => Some(asset.name.clone()),
                "platform" => Some(asset.platform.clone()),
                "region" => Some(asset.region.clone()),
                "environment" | "env" => Some(asset.environment.clone()),
                "site" => asset.site.clone(),
                "os" => asset.os.clone(),
                "image" | "image_family" => asset.image_family.clone(),
                "version" | "image_version" => asset.image_version.clone(),
                "critical" => Some(asset.critical.to_string()),
                other => {
                    let tag = other.strip_prefix("tag:").unwrap_or(other);
                    asset.tags.get(tag).cloned()
                }
            };
            let hit = actual.map_or(false, |actual| value_matches(&clause.value, &actual));
            hit != clause.negate
        })
    }
}

fn value_matches(pattern: &str, actual: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => actual.to_lowercase().starts_with(&prefix.to_lowercase()),
        None => actual.eq_ignore_ascii_case(pattern),
    }
}

/// Compare dotted version strings numerically, segment by segment.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .map(|seg| {
                seg.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (pa, pb) = (parse(a), parse(b));
    for i in 0..pa.len().max(pb.len()) {
        let ord = pa.get(i).unwrap_or(&0).cmp(pb.get(i).unwrap_or(&0));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn major_of(version: &str) -> String {
    version
        .trim_start_matches('v')
        .split('.')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn compare_versions(current: &str, target: &str) -> VersionComparison {
    VersionComparison {
        current: current.to_string(),
        target: target.to_string(),
        is_upgrade: compare_version_strings(target, current) == Ordering::Greater,
        major_change: major_of(current) != major_of(target),
    }
}

/// Heuristic stand-in for the statistical risk engine.
pub fn score_risk(input: &RiskInput) -> RiskScore {
    let mut factors = Vec::new();
    let mut score: f64 = match input.environment.to_lowercase().as_str() {
        "production" | "prod" => {
            factors.push("production environment".to_string());
            40.0
        }
        "staging" => 20.0,
        _ => 10.0,
    };

    let blast = (10.0 * ((input.asset_count as f64) + 1.0).log10()).min(30.0);
    if blast >= 20.0 {
        factors.push(format!("{} assets in scope", input.asset_count));
    }
    score += blast;

    if input.asset_count > 0 && input.critical_assets > 0 {
        let ratio = input.critical_assets as f64 / input.asset_count as f64;
        score += (ratio * 20.0).max(5.0);
        factors.push(format!("{} critical assets", input.critical_assets));
    }

    score += match input.change_kind.as_str() {
        "failover" | "dr_drill" => 15.0,
        "terraform" | "infrastructure" => 12.0,
        "patch" | "kernel" | "image" => 10.0,
        "certificate" => 8.0,
        _ => 5.0,
    };

    let score = score.clamp(0.0, 100.0);
    RiskScore {
        score,
        tier: RiskTier::from_score(score),
        factors,
    }
}

pub fn simulate_rollout(
    asset_count: usize,
    canary_percentage: f64,
    wave_percentage: f64,
) -> RolloutSimulation {
    let shape = RolloutShape::compute(asset_count, canary_percentage, wave_percentage, None);
    let waves = shape.waves.len() as u32;
    let mut notes = Vec::new();
    if shape.capped {
        notes.push("wave count capped at 10; residual assets folded into last wave".to_string());
    }
    RolloutSimulation {
        waves,
        estimated_duration_minutes: 15 + 30 + waves * 20 + 15,
        predicted_failure_rate: 0.01 + 0.002 * waves as f64,
        notes,
    }
}
