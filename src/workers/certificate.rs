//! Certificate rotation, plus a read-only TLS endpoint validation mode.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::prompt::PromptBuilder;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::{
    Certificate, CertificateBinding, RiskInput, TlsEndpointCheck, ToolOutput, ToolParams,
};

pub struct CertificateRotationWorker;

const TOOLS: &[&str] = &[
    "list_certificates",
    "map_certificate_usage",
    "validate_tls_endpoint",
    "calculate_risk_score",
];

const DEFAULT_EXPIRY_WINDOW_DAYS: u32 = 30;

/// One certificate with everything that presents it.
#[derive(Debug, Clone, Serialize)]
struct CertificateUsage {
    fingerprint: String,
    common_name: String,
    days_remaining: i64,
    bindings: Vec<CertificateBinding>,
}

impl CertificateUsage {
    fn expired(&self) -> bool {
        self.days_remaining <= 0
    }
}

fn expiry_window(task: &TaskSpec) -> u32 {
    task.constraints
        .extra
        .get("expiring_within_days")
        .and_then(|v| v.as_u64())
        .map(|d| d.min(u32::MAX as u64) as u32)
        .unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS)
}

fn endpoints(usages: &[CertificateUsage]) -> BTreeSet<&str> {
    usages
        .iter()
        .flat_map(|u| u.bindings.iter().map(|b| b.endpoint.as_str()))
        .collect()
}

fn bound_assets(usages: &[CertificateUsage]) -> BTreeSet<&str> {
    usages
        .iter()
        .flat_map(|u| u.bindings.iter().map(|b| b.asset_id.as_str()))
        .collect()
}

impl CertificateRotationWorker {
    async fn validate_endpoints(
        &self,
        task: &TaskSpec,
        mut session: Session<'_>,
        usages: &[CertificateUsage],
        window: u32,
    ) -> Result<WorkerResult, WorkerError> {
        let params = endpoints(usages)
            .into_iter()
            .map(|endpoint| ToolParams::ValidateTlsEndpoint {
                endpoint: endpoint.to_string(),
            })
            .collect();
        let checks: Vec<TlsEndpointCheck> = session
            .optional_many(params, ToolOutput::into_tls_check)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let invalid = checks.iter().filter(|c| !c.valid).count();
        let expiring = checks
            .iter()
            .filter(|c| c.valid && c.days_remaining <= window as i64)
            .count();
        let risk = if invalid > 0 {
            RiskTier::High
        } else if expiring > 0 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        };

        tracing::info!(
            "[{}] Validated {} endpoints ({} invalid, {} expiring)",
            self.name(),
            checks.len(),
            invalid,
            expiring
        );

        session
            .into_builder(task)
            .report_only(None)
            .summary(format!(
                "Validated {} TLS endpoints: {} invalid, {} expiring within {} days",
                checks.len(),
                invalid,
                expiring,
                window
            ))
            .affected_assets(bound_assets(usages).len())
            .risk(risk)
            .quality(100.0)
            .build()
    }
}

#[async_trait]
impl Worker for CertificateRotationWorker {
    fn name(&self) -> &str {
        "certificate-rotator"
    }

    fn description(&self) -> &str {
        "Plans rotation of expiring certificates; validates TLS endpoints in validate-only mode"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::CertificateRotation]
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
        let window = expiry_window(task);

        let certificates: Vec<Certificate> = session
            .essential(
                ToolParams::ListCertificates {
                    expiring_within_days: Some(window),
                },
                ToolOutput::into_certificates,
            )
            .await?;

        let lookups = certificates
            .iter()
            .map(|cert| ToolParams::MapCertificateUsage {
                fingerprint: cert.fingerprint.clone(),
            })
            .collect();
        let bindings = session
            .optional_many(lookups, ToolOutput::into_certificate_usage)
            .await?;

        let now = Utc::now();
        let usages: Vec<CertificateUsage> = certificates
            .iter()
            .zip(bindings)
            .map(|(cert, bindings)| CertificateUsage {
                fingerprint: cert.fingerprint.clone(),
                common_name: cert.common_name.clone(),
                days_remaining: cert.days_until_expiry(now),
                bindings: bindings.unwrap_or_default(),
            })
            .collect();

        if task.constraints.is_validate_only() {
            return self.validate_endpoints(task, session, &usages, window).await;
        }

        if usages.is_empty() {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!("No certificates expire within {} days", window))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let unmapped: Vec<&str> = usages
            .iter()
            .filter(|u| u.bindings.is_empty())
            .map(|u| u.common_name.as_str())
            .collect();
        if !unmapped.is_empty() {
            session.record_error(format!(
                "no known consumers for {}; rotation may miss endpoints",
                unmapped.join(", ")
            ));
        }

        let assets = bound_assets(&usages);
        let endpoint_count = endpoints(&usages).len();
        let expired = usages.iter().filter(|u| u.expired()).count();

        let engine = session
            .optional(
                ToolParams::CalculateRiskScore(RiskInput {
                    asset_count: assets.len(),
                    critical_assets: 0,
                    environment: task.environment.as_str().to_string(),
                    change_kind: "certificate".to_string(),
                }),
                ToolOutput::into_risk_score,
            )
            .await?;
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: assets.len(),
            critical_assets: 0,
            engine_score: engine.as_ref(),
            floor: Some(if expired > 0 { RiskTier::High } else { RiskTier::Medium }),
        });

        let fallback = default_plan(task.task_type, endpoint_count, risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .section("Expiry window", format!("{} days", window))
            .json("Certificates and bindings", &usages)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(format!(
                "{} certificates to rotate ({} expired) across {} endpoints on {} assets",
                usages.len(),
                expired,
                endpoint_count,
                assets.len()
            ))
            .affected_assets(assets.len())
            .risk(risk)
            .quality(quality)
            .build()
    }
}
