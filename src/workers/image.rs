//! Golden image lifecycle: candidate promotion and migration off old images.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use super::prompt::PromptBuilder;
use super::session::scope_query;
use super::{ExecutionContext, Session, Worker, WorkerError};
use crate::gate::{assess_risk, score_plan, RiskSignals};
use crate::plan::default_plan;
use crate::result::WorkerResult;
use crate::task::{RiskTier, TaskSpec, TaskType};
use crate::tools::inventory::compare_version_strings;
use crate::tools::{GoldenImage, ImageStatus, ToolOutput, ToolParams};

pub struct ImageManagementWorker;

const TOOLS: &[&str] = &["list_images", "query_assets", "compare_versions"];

/// Lifecycle state of one image family.
#[derive(Debug, Clone, Serialize)]
struct FamilyState {
    family: String,
    approved: Option<String>,
    candidate: Option<String>,
    deprecated: Vec<String>,
    lagging_assets: Vec<String>,
}

fn newest<'a>(images: impl Iterator<Item = &'a GoldenImage>) -> Option<&'a GoldenImage> {
    images.max_by(|a, b| compare_version_strings(&a.version, &b.version))
}

fn family_states(images: &[GoldenImage]) -> BTreeMap<String, FamilyState> {
    let mut families: BTreeMap<String, Vec<&GoldenImage>> = BTreeMap::new();
    for image in images {
        families.entry(image.family.clone()).or_default().push(image);
    }

    families
        .into_iter()
        .map(|(family, images)| {
            let approved = newest(images.iter().copied().filter(|i| i.status == ImageStatus::Approved));
            let candidate = newest(images.iter().copied().filter(|i| i.status == ImageStatus::Candidate))
                .filter(|c| {
                    approved.map_or(true, |a| {
                        compare_version_strings(&c.version, &a.version) == Ordering::Greater
                    })
                });
            let state = FamilyState {
                family: family.clone(),
                approved: approved.map(|i| i.version.clone()),
                candidate: candidate.map(|i| i.version.clone()),
                deprecated: images
                    .iter()
                    .filter(|i| i.status == ImageStatus::Deprecated)
                    .map(|i| i.version.clone())
                    .collect(),
                lagging_assets: Vec::new(),
            };
            (family, state)
        })
        .collect()
}

#[async_trait]
impl Worker for ImageManagementWorker {
    fn name(&self) -> &str {
        "image-lifecycle-manager"
    }

    fn description(&self) -> &str {
        "Plans golden image promotion and migration of assets off outdated images"
    }

    fn supported_tasks(&self) -> &[TaskType] {
        &[TaskType::ImageManagement]
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
        let family = task
            .context
            .metadata
            .get("image_family")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let images = session
            .essential(ToolParams::ListImages { family }, ToolOutput::into_images)
            .await?;
        if images.is_empty() {
            return Err(WorkerError::InvalidTask("no images in catalog scope".to_string()));
        }
        let assets = session
            .optional(ToolParams::QueryAssets(scope_query(task)), ToolOutput::into_assets)
            .await?
            .unwrap_or_default();

        let mut states = family_states(&images);
        for asset in &assets {
            let (Some(family), version) = (asset.image_family.as_deref(), asset.image_version.as_deref()) else {
                continue;
            };
            if let Some(state) = states.get_mut(family) {
                if state.approved.is_some() && state.approved.as_deref() != version {
                    state.lagging_assets.push(asset.id.clone());
                }
            }
        }

        let promotions: Vec<&FamilyState> = states.values().filter(|s| s.candidate.is_some()).collect();
        let lagging: usize = states.values().map(|s| s.lagging_assets.len()).sum();

        if promotions.is_empty() && lagging == 0 {
            return session
                .into_builder(task)
                .report_only(None)
                .summary(format!("Image catalog current across {} families", states.len()))
                .risk(RiskTier::Low)
                .quality(100.0)
                .build();
        }

        let mut major = false;
        for state in &promotions {
            if let (Some(approved), Some(candidate)) = (&state.approved, &state.candidate) {
                let comparison = session
                    .optional(
                        ToolParams::CompareVersions {
                            current: approved.clone(),
                            target: candidate.clone(),
                        },
                        ToolOutput::into_version_comparison,
                    )
                    .await?;
                major |= comparison.map_or(false, |c| c.major_change);
            }
        }

        let floor = if major {
            RiskTier::High
        } else if promotions.is_empty() {
            RiskTier::Low
        } else {
            RiskTier::Medium
        };
        let risk = assess_risk(&RiskSignals {
            hint: task.risk_level,
            environment: Some(&task.environment),
            affected_assets: lagging,
            critical_assets: 0,
            engine_score: None,
            floor: Some(floor),
        });

        let fallback = default_plan(task.task_type, lagging, risk, &task.constraints);
        let prompt = PromptBuilder::for_task(task)
            .json("Image families", &states)
            .reference_plan(&fallback)
            .build();

        let resolved = session.generate_plan(prompt, fallback).await?;
        let quality = score_plan(&resolved.plan);

        let mut parts: Vec<String> = promotions
            .iter()
            .map(|s| {
                format!(
                    "{}: promote {} over {}",
                    s.family,
                    s.candidate.as_deref().unwrap_or_default(),
                    s.approved.as_deref().unwrap_or("nothing")
                )
            })
            .collect();
        parts.push(format!("{} assets on outdated images", lagging));

        session
            .into_builder(task)
            .resolved_plan(resolved)
            .summary(parts.join("; "))
            .affected_assets(lagging)
            .risk(risk)
            .quality(quality)
            .build()
    }
}
