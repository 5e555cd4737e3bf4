//! Prompt assembly shared by the workers.

use serde::Serialize;

use crate::plan::Plan;
use crate::task::TaskSpec;

/// Instructions for workers that expect a remediation plan back.
pub const PLAN_SYSTEM_PROMPT: &str = r#"You are an infrastructure operations planner for a fleet of managed assets.
Respond with a single JSON object and nothing else. The object must have:
  "summary": string,
  "phases": array of { "name", "kind" ("preflight" | "canary" | "wave" | "validation" | "step"),
              "description", "asset_count", "asset_percentage" (cumulative 0-100),
              "rollback_on_failure", "success_criteria": [string], "duration_minutes" },
  "estimated_duration_minutes": integer,
  "rollback_policy": { "automatic": bool, "triggers": [ { "type": "error_rate", "threshold_percent": number }
                       | { "type": "health_check_failure" } | { "type": "manual" } ], "strategy": string },
  "notifications": { "on_start": [string], "on_failure": [string], "on_complete": [string] }
Start with a small canary, grow through waves, and never change every asset in one phase.
Every plan needs a rollback policy with at least one trigger."#;

/// Instructions for workers that expect a findings report back.
pub const REPORT_SYSTEM_PROMPT: &str = r#"You are an infrastructure incident analyst.
Respond with a single JSON object and nothing else. The object must have:
  "summary": string,
  "probable_cause": string,
  "confidence": number between 0 and 1,
  "affected_assets": [asset id],
  "recommendations": [string],
  "timeline": [string]
Only cite assets and alerts present in the evidence."#;

/// Items embedded per list before truncation.
const MAX_LISTED: usize = 40;

/// Sectioned user prompt.
pub struct PromptBuilder {
    sections: Vec<(String, String)>,
}

impl PromptBuilder {
    /// Start with goal, environment, scope and constraints of the task.
    pub fn for_task(task: &TaskSpec) -> Self {
        let mut builder = Self {
            sections: Vec::new(),
        };
        builder = builder
            .section("Goal", task.describe_goal())
            .section(
                "Environment",
                format!("{} (task type {})", task.environment.as_str(), task.task_type),
            );
        if let Some(filter) = &task.context.asset_filter {
            builder = builder.section("Asset filter", filter.clone());
        }
        if !task.context.regions.is_empty() {
            builder = builder.section("Regions", task.context.regions.join(", "));
        }
        if let Ok(constraints) = serde_json::to_string_pretty(&task.constraints) {
            if constraints != "{}" {
                builder = builder.section("Constraints", constraints);
            }
        }
        builder
    }

    pub fn section(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.sections.push((title.into(), body.into()));
        self
    }

    /// Embed a serializable value as pretty JSON.
    pub fn json<T: Serialize + ?Sized>(self, title: &str, value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(body) => self.section(title, body),
            Err(_) => self,
        }
    }

    /// Embed at most a fixed number of list items, noting how many were left out.
    pub fn list<T: Serialize>(self, title: &str, items: &[T]) -> Self {
        let shown = &items[..items.len().min(MAX_LISTED)];
        let title = if items.len() > shown.len() {
            format!("{} (first {} of {})", title, shown.len(), items.len())
        } else {
            title.to_string()
        };
        self.json(&title, shown)
    }

    /// A known-safe plan the model may refine.
    pub fn reference_plan(self, plan: &Plan) -> Self {
        self.json("Reference plan (refine, do not weaken)", plan)
    }

    pub fn build(self) -> String {
        self.sections
            .into_iter()
            .map(|(title, body)| format!("## {}\n{}", title, body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[test]
    fn test_prompt_sections_and_truncation() {
        let task = TaskSpec::new("acme", TaskType::PatchRollout, "patch the web tier")
            .with_asset_filter("role=web");
        let items: Vec<u32> = (0..100).collect();
        let prompt = PromptBuilder::for_task(&task).list("Assets", &items).build();

        assert!(prompt.starts_with("## Goal\npatch the web tier"));
        assert!(prompt.contains("## Asset filter\nrole=web"));
        assert!(prompt.contains("## Assets (first 40 of 100)"));
        assert!(!prompt.contains("## Constraints"));
    }
}
