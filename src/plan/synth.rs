//! Deterministic phased rollout synthesizer.
//!
//! Builds a canary + waves + validation plan from an asset count and a risk
//! tier. Used as the fallback whenever a generated plan cannot be recovered,
//! and as the reference shape generated plans are prompted to resemble.

use super::{NotificationMatrix, Phase, PhaseKind, Plan, RollbackPolicy, RollbackTrigger};
use crate::task::{Constraints, RiskTier};

/// Hard cap on the number of waves; the residual is folded into the last one.
pub const MAX_WAVES: usize = 10;

const PREFLIGHT_MINUTES: u32 = 15;
const CANARY_MINUTES: u32 = 30;
const WAVE_MINUTES: u32 = 20;
const VALIDATION_MINUTES: u32 = 15;

/// Canary and wave sizing defaults for a risk tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloutDefaults {
    pub canary_percentage: f64,
    pub wave_percentage: f64,
    pub error_rate_threshold: f64,
}

impl RolloutDefaults {
    pub fn for_risk(risk: RiskTier) -> Self {
        match risk {
            RiskTier::Critical | RiskTier::High => Self {
                canary_percentage: 2.0,
                wave_percentage: 10.0,
                error_rate_threshold: 2.0,
            },
            RiskTier::Medium => Self {
                canary_percentage: 5.0,
                wave_percentage: 25.0,
                error_rate_threshold: 5.0,
            },
            RiskTier::Low => Self {
                canary_percentage: 10.0,
                wave_percentage: 50.0,
                error_rate_threshold: 5.0,
            },
        }
    }
}

/// Inputs to [`synthesize_rollout`].
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutParams {
    pub asset_count: usize,
    pub risk: RiskTier,
    pub canary_percentage: f64,
    pub wave_percentage: f64,
    pub max_batch_size: Option<u32>,
}

impl RolloutParams {
    /// Parameters with the risk tier's defaults.
    pub fn new(asset_count: usize, risk: RiskTier) -> Self {
        let defaults = RolloutDefaults::for_risk(risk);
        Self {
            asset_count,
            risk,
            canary_percentage: defaults.canary_percentage,
            wave_percentage: defaults.wave_percentage,
            max_batch_size: None,
        }
    }

    /// Apply explicit caller overrides. Out-of-range percentages are ignored.
    pub fn with_constraints(mut self, constraints: &Constraints) -> Self {
        if let Some(canary) = constraints.canary_percentage.filter(|p| *p > 0.0 && *p <= 100.0) {
            self.canary_percentage = canary;
        }
        if let Some(wave) = constraints.wave_percentage.filter(|p| *p > 0.0 && *p <= 100.0) {
            self.wave_percentage = wave;
        }
        if let Some(batch) = constraints.max_batch_size.filter(|b| *b > 0) {
            self.max_batch_size = Some(batch);
        }
        self
    }
}

/// Asset arithmetic of a rollout, independent of phase rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutShape {
    pub canary_count: usize,
    pub wave_size: usize,
    /// Asset count per wave, in order.
    pub waves: Vec<usize>,
    /// True when the wave count hit [`MAX_WAVES`].
    pub capped: bool,
}

impl RolloutShape {
    pub fn compute(
        asset_count: usize,
        canary_percentage: f64,
        wave_percentage: f64,
        max_batch_size: Option<u32>,
    ) -> Self {
        if asset_count == 0 {
            return Self {
                canary_count: 0,
                wave_size: 0,
                waves: Vec::new(),
                capped: false,
            };
        }

        let n = asset_count as f64;
        let canary_count = ((n * canary_percentage / 100.0).floor() as usize)
            .max(1)
            .min(asset_count);
        let remaining = asset_count - canary_count;

        let mut wave_size = ((n * wave_percentage / 100.0).floor() as usize).max(1);
        if let Some(batch) = max_batch_size.filter(|b| *b > 0) {
            wave_size = wave_size.min(batch as usize);
        }

        let raw_waves = remaining.div_ceil(wave_size);
        let wave_count = raw_waves.min(MAX_WAVES);

        let mut waves = vec![wave_size; wave_count];
        if let Some(last) = waves.last_mut() {
            *last = remaining - wave_size * (wave_count - 1);
        }

        Self {
            canary_count,
            wave_size,
            waves,
            capped: raw_waves > MAX_WAVES,
        }
    }
}

/// Standard rollback policy for synthesized plans.
pub fn standard_rollback_policy(risk: RiskTier) -> RollbackPolicy {
    RollbackPolicy {
        automatic: true,
        triggers: vec![
            RollbackTrigger::ErrorRate {
                threshold_percent: RolloutDefaults::for_risk(risk).error_rate_threshold,
            },
            RollbackTrigger::HealthCheckFailure,
            RollbackTrigger::Manual,
        ],
        strategy: "restore affected assets to their previous image and configuration".to_string(),
    }
}

/// Standard notification matrix for synthesized plans.
pub fn standard_notifications() -> NotificationMatrix {
    NotificationMatrix {
        on_start: vec!["change-management".to_string()],
        on_phase_complete: vec!["ops-oncall".to_string()],
        on_failure: vec!["ops-oncall".to_string(), "incident-pager".to_string()],
        on_complete: vec!["change-management".to_string(), "asset-owners".to_string()],
    }
}

fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 * 10000.0 / total as f64).round() / 100.0
}

/// Build a preflight → canary → waves → validation plan.
pub fn synthesize_rollout(params: &RolloutParams) -> Plan {
    let shape = RolloutShape::compute(
        params.asset_count,
        params.canary_percentage,
        params.wave_percentage,
        params.max_batch_size,
    );
    let total = params.asset_count;
    let threshold = RolloutDefaults::for_risk(params.risk).error_rate_threshold;
    let mut phases = Vec::with_capacity(shape.waves.len() + 3);

    phases.push(Phase {
        name: "pre-flight validation".to_string(),
        kind: PhaseKind::Preflight,
        description: "Verify connectivity, free disk space and recent backups before any change"
            .to_string(),
        asset_count: 0,
        asset_percentage: 0.0,
        rollback_on_failure: false,
        success_criteria: vec!["all pre-flight checks pass".to_string()],
        checks: vec![
            "connectivity".to_string(),
            "disk_space".to_string(),
            "backup_verified".to_string(),
        ],
        duration_minutes: Some(PREFLIGHT_MINUTES),
    });

    let mut covered = 0usize;
    if shape.canary_count > 0 {
        covered += shape.canary_count;
        phases.push(Phase {
            name: "canary".to_string(),
            kind: PhaseKind::Canary,
            description: format!("Apply the change to {} canary assets", shape.canary_count),
            asset_count: shape.canary_count,
            asset_percentage: percentage(covered, total),
            rollback_on_failure: true,
            success_criteria: vec![
                format!("error rate below {}%", threshold),
                "all health checks passing for 30 minutes".to_string(),
            ],
            checks: vec!["service_health".to_string(), "error_rate".to_string()],
            duration_minutes: Some(CANARY_MINUTES),
        });
    }

    for (i, count) in shape.waves.iter().enumerate() {
        covered += count;
        phases.push(Phase {
            name: format!("wave {}", i + 1),
            kind: PhaseKind::Wave,
            description: format!("Apply the change to the next {} assets", count),
            asset_count: *count,
            asset_percentage: percentage(covered, total),
            rollback_on_failure: true,
            success_criteria: vec![
                format!("error rate below {}%", threshold),
                "health checks passing".to_string(),
            ],
            checks: vec!["service_health".to_string(), "error_rate".to_string()],
            duration_minutes: Some(WAVE_MINUTES),
        });
    }

    phases.push(Phase {
        name: "post-rollout validation".to_string(),
        kind: PhaseKind::Validation,
        description: "Confirm every asset reports healthy on the target baseline".to_string(),
        asset_count: total,
        asset_percentage: 100.0,
        rollback_on_failure: false,
        success_criteria: vec!["100% of assets compliant with target baseline".to_string()],
        checks: vec!["baseline_compliance".to_string()],
        duration_minutes: Some(VALIDATION_MINUTES),
    });

    let estimated = phases.iter().filter_map(|p| p.duration_minutes).sum();

    Plan {
        summary: format!(
            "Phased rollout across {} assets: {} canary, {} waves",
            total,
            shape.canary_count,
            shape.waves.len()
        ),
        phases,
        estimated_duration_minutes: Some(estimated),
        rollback_policy: Some(standard_rollback_policy(params.risk)),
        notifications: standard_notifications(),
        extra: Default::default(),
    }
}
