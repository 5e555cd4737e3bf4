//! HTTP API.
//!
//! ## Endpoints
//! - `GET /api/health` - liveness plus routing coverage
//! - `GET /api/workers` - registered worker descriptors
//! - `POST /api/tasks` - dispatch a task and return its result envelope

mod routes;
mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
