//! Domain model for the planner / coder / reviewer workflow.
//!
//! A workflow run is captured by a single [`ExecutionPlan`] aggregate. Everything the
//! orchestrator persists or announces is built from the types in this crate.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
