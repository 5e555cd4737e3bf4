//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::task::TaskType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workers: usize,
    /// Task types that would currently fail to route.
    pub uncovered_task_types: Vec<TaskType>,
}

/// Query parameters for `POST /api/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchQuery {
    /// Run on this worker instead of the first one registered for the type.
    #[serde(default)]
    pub worker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error class.
    pub kind: String,
}
