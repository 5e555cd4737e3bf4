//! Shared fixtures for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, TokenUsage};
use crate::plan::{synthesize_rollout, RolloutParams};
use crate::task::RiskTier;
use crate::tools::*;
use crate::workers::ExecutionContext;

/// Completion client replaying canned responses in order.
///
/// Clones share the script and the request log.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    stop_reason: Option<String>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::default(),
            stop_reason: Some("stop".to_string()),
        }
    }

    pub fn single(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn with_stop_reason(mut self, reason: &str) -> Self {
        self.stop_reason = Some(reason.to_string());
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::network_error("script exhausted"))?;
        Ok(CompletionResponse {
            content,
            usage: TokenUsage::new(120, 80),
            stop_reason: self.stop_reason.clone(),
            model: Some("scripted".to_string()),
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Context over [`sample_snapshot`] tools and the given client.
pub fn context_with(llm: ScriptedLlm) -> ExecutionContext {
    let mut registry = ToolRegistry::new();
    Arc::new(sample_snapshot()).register_tools(&mut registry);
    ExecutionContext::new(Arc::new(registry), Arc::new(llm))
}

/// Context with no tools registered at all.
pub fn context_without_tools(llm: ScriptedLlm) -> ExecutionContext {
    ExecutionContext::new(Arc::new(ToolRegistry::new()), Arc::new(llm))
}

/// Well-formed plan JSON, as a model following instructions would return it.
pub fn plan_json(asset_count: usize, risk: RiskTier) -> String {
    let mut plan = synthesize_rollout(&RolloutParams::new(asset_count, risk));
    plan.summary = "Staged remediation".to_string();
    serde_json::to_string(&plan).unwrap()
}

fn asset(id: &str, platform: &str, region: &str, env: &str, family: Option<&str>, version: Option<&str>, role: &str) -> Asset {
    let mut tags = BTreeMap::new();
    tags.insert("role".to_string(), role.to_string());
    Asset {
        id: id.to_string(),
        name: id.to_string(),
        platform: platform.to_string(),
        region: region.to_string(),
        environment: env.to_string(),
        site: None,
        os: None,
        image_family: family.map(str::to_string),
        image_version: version.map(str::to_string),
        critical: false,
        monthly_cost: None,
        cpu_utilization: None,
        tags,
    }
}

fn image(family: &str, version: &str, platform: &str, status: ImageStatus) -> GoldenImage {
    GoldenImage {
        id: format!("{}-{}", family, version),
        family: family.to_string(),
        version: version.to_string(),
        platform: Some(platform.to_string()),
        status,
        released_at: None,
    }
}

/// Small mixed fleet.
///
/// Ten assets; the approved image of both families is `2024.06.1` and five
/// assets (web-2, web-3, db-1, batch-1, win-2) lag behind it.
pub fn sample_snapshot() -> FleetSnapshot {
    let now = Utc::now();
    let ubuntu = Some("ubuntu-base");
    let windows = Some("windows-base");

    let mut assets = vec![
        asset("web-1", "linux", "eu-west-1", "production", ubuntu, Some("2024.06.1"), "web"),
        asset("web-2", "linux", "eu-west-1", "production", ubuntu, Some("2024.03.2"), "web"),
        asset("web-3", "linux", "eu-central-1", "production", ubuntu, Some("2023.12.0"), "web"),
        asset("web-4", "linux", "us-east-1", "production", ubuntu, Some("2024.06.1"), "web"),
        asset("db-1", "linux", "eu-west-1", "production", ubuntu, Some("2024.03.2"), "db"),
        asset("db-2", "linux", "us-east-1", "production", ubuntu, Some("2024.06.1"), "db"),
        asset("batch-1", "linux", "us-east-1", "staging", ubuntu, Some("2024.03.2"), "batch"),
        asset("win-1", "windows", "eu-west-1", "production", windows, Some("2024.06.1"), "app"),
        asset("win-2", "windows", "us-east-1", "production", windows, Some("2024.03.2"), "app"),
        asset("edge-1", "linux", "eu-west-1", "development", None, None, "edge"),
    ];
    let costs = [
        ("web-1", 320.0, 45.0),
        ("web-2", 320.0, 6.0),
        ("web-3", 280.0, 4.0),
        ("web-4", 300.0, 38.0),
        ("db-1", 1200.0, 70.0),
        ("db-2", 1150.0, 55.0),
        ("batch-1", 150.0, 3.0),
        ("win-1", 410.0, 22.0),
        ("win-2", 410.0, 18.0),
    ];
    for a in &mut assets {
        if let Some((_, cost, cpu)) = costs.iter().find(|(id, _, _)| *id == a.id) {
            a.monthly_cost = Some(*cost);
            a.cpu_utilization = Some(*cpu);
        }
        match a.id.as_str() {
            "db-1" => {
                a.critical = true;
                a.site = Some("fra1".to_string());
            }
            "db-2" => {
                a.critical = true;
                a.site = Some("iad1".to_string());
            }
            _ => {}
        }
    }

    FleetSnapshot {
        assets,
        golden_images: vec![
            image("ubuntu-base", "2024.03.2", "linux", ImageStatus::Deprecated),
            image("ubuntu-base", "2024.06.1", "linux", ImageStatus::Approved),
            image("ubuntu-base", "2024.09.0", "linux", ImageStatus::Candidate),
            image("windows-base", "2024.06.1", "windows", ImageStatus::Approved),
        ],
        compliance: vec![
            ComplianceStatus {
                framework: "cis".to_string(),
                controls: vec![
                    control("1.1.1", "Disable root SSH login", ControlState::Failing, RiskTier::High, &["web-2", "web-3"]),
                    control("4.1.2", "Ensure auditd is enabled", ControlState::Failing, RiskTier::Medium, &["db-1"]),
                    control("5.2.4", "Password max age", ControlState::Passing, RiskTier::Low, &[]),
                    control("1.5.1", "Bootloader permissions", ControlState::Unknown, RiskTier::Low, &[]),
                ],
            },
            ComplianceStatus {
                framework: "soc2".to_string(),
                controls: vec![control("CC6.1", "Logical access", ControlState::Passing, RiskTier::Medium, &[])],
            },
        ],
        control_checks: vec![ControlCheck {
            control_id: "1.1.1".to_string(),
            passed: false,
            evidence: "PermitRootLogin yes on 2 assets".to_string(),
            remediation: Some("Set PermitRootLogin no and reload sshd".to_string()),
        }],
        dr: Some(DrStatus {
            sites: vec![
                DrSite {
                    name: "fra1".to_string(),
                    role: SiteRole::Primary,
                    healthy: true,
                    replication_lag_seconds: None,
                },
                DrSite {
                    name: "iad1".to_string(),
                    role: SiteRole::Secondary,
                    healthy: true,
                    replication_lag_seconds: Some(45),
                },
            ],
            rpo_minutes: Some(15),
            rto_minutes: Some(60),
            last_drill_at: Some(now - Duration::days(120)),
        }),
        certificates: vec![
            Certificate {
                fingerprint: "aa:01".to_string(),
                common_name: "www.example.com".to_string(),
                issuer: "Example CA".to_string(),
                not_after: now + Duration::days(10),
                sans: vec!["example.com".to_string()],
            },
            Certificate {
                fingerprint: "aa:02".to_string(),
                common_name: "api.example.com".to_string(),
                issuer: "Example CA".to_string(),
                not_after: now + Duration::days(200),
                sans: vec![],
            },
            Certificate {
                fingerprint: "aa:03".to_string(),
                common_name: "legacy.example.com".to_string(),
                issuer: "Old CA".to_string(),
                not_after: now - Duration::days(2),
                sans: vec![],
            },
        ],
        certificate_bindings: vec![
            binding("aa:01", "web-1", "https://www.example.com:443", "www"),
            binding("aa:01", "web-2", "https://www.example.com:443", "www"),
            binding("aa:02", "web-3", "https://api.example.com:443", "api"),
            binding("aa:03", "web-4", "https://legacy.example.com:443", "legacy"),
        ],
        alerts: vec![
            Alert {
                id: "alert-1".to_string(),
                title: "High 5xx rate on web tier".to_string(),
                severity: RiskTier::High,
                asset_id: Some("web-2".to_string()),
                raised_at: now - Duration::hours(2),
            },
            Alert {
                id: "alert-2".to_string(),
                title: "Disk latency spike".to_string(),
                severity: RiskTier::Medium,
                asset_id: Some("db-1".to_string()),
                raised_at: now - Duration::hours(3),
            },
            Alert {
                id: "alert-3".to_string(),
                title: "Certificate renewal reminder".to_string(),
                severity: RiskTier::Low,
                asset_id: Some("web-1".to_string()),
                raised_at: now - Duration::hours(72),
            },
        ],
        security_findings: vec![
            finding("f-1", "web-2", "OpenSSL buffer overread", RiskTier::Critical, Some("CVE-2024-5535")),
            finding("f-2", "web-3", "OpenSSL buffer overread", RiskTier::Critical, Some("CVE-2024-5535")),
            finding("f-3", "db-1", "sudoedit privilege escalation", RiskTier::High, Some("CVE-2023-22809")),
            finding("f-4", "batch-1", "Weak TLS cipher suites", RiskTier::Medium, None),
        ],
        tls_endpoints: vec![],
        currency: "USD".to_string(),
    }
}

fn control(id: &str, title: &str, state: ControlState, severity: RiskTier, affected: &[&str]) -> ControlResult {
    ControlResult {
        control_id: id.to_string(),
        title: title.to_string(),
        state,
        severity,
        affected_assets: affected.iter().map(|s| s.to_string()).collect(),
    }
}

fn binding(fingerprint: &str, asset_id: &str, endpoint: &str, service: &str) -> CertificateBinding {
    CertificateBinding {
        fingerprint: fingerprint.to_string(),
        asset_id: asset_id.to_string(),
        endpoint: endpoint.to_string(),
        service: service.to_string(),
    }
}

fn finding(id: &str, asset_id: &str, title: &str, severity: RiskTier, cve: Option<&str>) -> SecurityFinding {
    SecurityFinding {
        id: id.to_string(),
        asset_id: asset_id.to_string(),
        title: title.to_string(),
        severity,
        cve: cve.map(str::to_string),
        fixed_in: cve.map(|_| "patched".to_string()),
    }
}
