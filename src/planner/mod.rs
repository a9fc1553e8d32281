//! Planning module for project runs.
//!
//! This module compares the live project with the state snapshot, builds
//! the per-unit plan, and executes it through the scheduler.

mod diff;
mod executor;
mod plan;

pub use diff::{render_diff, DiffEngine, DEPENDENCY_REASON, FORCE_APPLY_REASON, TAINTED_REASON};
pub use executor::{ExecutionResult, PlanExecutor};
pub use plan::{ProjectPlan, UnitOperation, UnitPlan};
