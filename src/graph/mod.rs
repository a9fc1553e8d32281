//! Dependency graph validation and scheduling.
//!
//! The graph is a plain adjacency map from unit key to the keys it depends
//! on. Units are never linked to each other directly; everything goes
//! through keys resolved by lookup.

mod cycle;
mod scheduler;

use indexmap::IndexMap;

pub use cycle::{check_dependencies, DependencyChecker, MAX_DEPENDENCY_DEPTH};
pub use scheduler::{CompletionHandle, Dispatch, ExecStatus, ScheduleMode, Scheduler};

/// Unit key to the ordered, de-duplicated keys of its dependencies.
pub type DependencyMap = IndexMap<String, Vec<String>>;
