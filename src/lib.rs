//! # Fleet Orchestrator
//!
//! Task routing, plan recovery and the human approval gate for golden-image
//! fleet remediation.
//!
//! This library provides:
//! - A closed set of task types, each handled by a specialist worker
//! - Tool and completion-service facades the workers build plans with
//! - Resilient recovery of structured plans from free-form model output
//! - Risk and quality scoring feeding a human-in-the-loop gate
//! - A thin HTTP API for dispatching tasks
//!
//! ## Task Flow
//!
//! ```text
//!   TaskSpec ──▶ Dispatcher ──▶ WorkerRegistry ──▶ Worker
//!                                                   │
//!                  ┌────────────────┬───────────────┤
//!                  ▼                ▼               ▼
//!             ToolRegistry      LlmClient     resolve_plan
//!                                                   │
//!                                                   ▼
//!                                  ResultBuilder ──▶ HITL gate ──▶ WorkerResult
//! ```
//!
//! ## Modules
//! - `task`: task specification and the closed task-type set
//! - `workers`: worker trait, registry and the built-in workers
//! - `dispatch`: worker selection, deadlines and final gate enforcement
//! - `tools`: tool facade with snapshot-backed and remote implementations
//! - `llm`: completion-service client
//! - `plan`: plan model, extraction and default plan synthesis
//! - `gate`: quality/risk scoring and the HITL gate
//! - `result`: the result envelope and its builder
//! - `config`: service configuration
//! - `api`: HTTP endpoints

pub mod api;
pub mod config;
pub mod dispatch;
pub mod gate;
pub mod llm;
pub mod plan;
pub mod result;
pub mod task;
pub mod tools;
pub mod workers;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use dispatch::{DispatchError, Dispatcher};
pub use result::{ResultBuilder, WorkerResult};
pub use task::{TaskSpec, TaskType};
