//! Task module - defines task specifications and the closed set of task types.
//!
//! A `TaskSpec` is produced upstream (HTTP layer, scheduler) and is immutable
//! once dispatched: workers only ever see `&TaskSpec`.

pub mod task;

pub use task::{
    Constraints, Environment, RiskTier, TaskContext, TaskSpec, TaskType, UnknownTaskType,
};
