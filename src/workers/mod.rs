//! Specialist workers.
//!
//! One worker per task type. Every worker follows the same sequence:
//! gather context through tools, prompt the completion service, recover a
//! plan (or fall back to the default plan for its category), then assemble a
//! [`WorkerResult`] whose risk, quality and HITL gate are computed on build.
//!
//! ## Workers
//! - `drift`: drift remediation against the golden image
//! - `patch`: patch rollouts
//! - `compliance`: compliance audits
//! - `incident`: incident investigation (report only)
//! - `dr`: disaster-recovery drills
//! - `cost`: cost optimization
//! - `security`: security scans
//! - `image`: golden image lifecycle
//! - `sop`: SOP authoring
//! - `terraform`: infrastructure-code generation
//! - `certificate`: certificate rotation and TLS endpoint validation
//! - `vulnerability`: vulnerability response

mod certificate;
mod compliance;
mod context;
mod cost;
mod dr;
mod drift;
mod image;
mod incident;
mod patch;
mod prompt;
mod registry;
mod security;
mod session;
mod sop;
mod terraform;
mod vulnerability;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use certificate::CertificateRotationWorker;
pub use compliance::ComplianceAuditWorker;
pub use context::ExecutionContext;
pub use cost::CostOptimizationWorker;
pub use dr::DrDrillWorker;
pub use drift::DriftRemediationWorker;
pub use image::ImageManagementWorker;
pub use incident::IncidentInvestigationWorker;
pub use patch::PatchRolloutWorker;
pub use registry::{SharedWorkerRegistry, WorkerRegistry};
pub use security::SecurityScanWorker;
pub use session::Session;
pub use sop::SopAuthoringWorker;
pub use terraform::TerraformGenerationWorker;
pub use vulnerability::VulnerabilityResponseWorker;

use crate::llm::LlmError;
use crate::plan::PlanValidationError;
use crate::result::WorkerResult;
use crate::task::{TaskSpec, TaskType};
use crate::tools::ToolError;

/// Errors that abort a worker's execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("essential tool {tool} failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("completion request failed: {0}")]
    Completion(#[from] LlmError),

    #[error("cancelled during {during}")]
    Cancelled { during: String },

    #[error("deadline exceeded during {during}")]
    DeadlineExceeded { during: String },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("plan violates invariants: {0}")]
    InvalidPlan(PlanValidationError),

    #[error("worker {0} produced neither a plan nor a report")]
    MissingPlan(String),
}

impl WorkerError {
    pub fn tool(source: ToolError, tool: impl Into<String>) -> Self {
        WorkerError::Tool {
            tool: tool.into(),
            source,
        }
    }

    /// True when the task was stopped from outside rather than failing.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled { .. } | WorkerError::DeadlineExceeded { .. }
        )
    }
}

/// Static description of a worker, registered once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerDescriptor {
    pub name: String,
    pub description: String,
    pub supported_tasks: Vec<TaskType>,
    pub required_tools: Vec<String>,
}

/// A specialist that turns one task type into a gated result.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Unique name, used as the registry key.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn supported_tasks(&self) -> &[TaskType];

    /// Tools this worker calls, essential or optional.
    fn required_tools(&self) -> &[&'static str];

    /// Run the task. Never mutates the task or any shared state.
    async fn execute(
        &self,
        task: &TaskSpec,
        ctx: &ExecutionContext,
    ) -> Result<WorkerResult, WorkerError>;

    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            supported_tasks: self.supported_tasks().to_vec(),
            required_tools: self.required_tools().iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Shared reference to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// One instance of every built-in worker.
pub fn builtin_workers() -> Vec<WorkerRef> {
    vec![
        Arc::new(DriftRemediationWorker),
        Arc::new(PatchRolloutWorker),
        Arc::new(ComplianceAuditWorker),
        Arc::new(IncidentInvestigationWorker),
        Arc::new(DrDrillWorker),
        Arc::new(CostOptimizationWorker),
        Arc::new(SecurityScanWorker),
        Arc::new(ImageManagementWorker),
        Arc::new(SopAuthoringWorker),
        Arc::new(TerraformGenerationWorker),
        Arc::new(CertificateRotationWorker),
        Arc::new(VulnerabilityResponseWorker),
    ]
}
