// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackforge
//!
//! A declarative orchestrator for infrastructure units wired together by
//! their outputs.
//!
//! ## Overview
//!
//! Stackforge lets you:
//!
//! - Describe a project as stacks of typed units in a YAML file
//! - Reference one unit's outputs from another unit's settings
//! - Plan which units must be deployed, updated or destroyed
//! - Apply the plan with bounded parallelism in dependency order
//!
//! ## Architecture
//!
//! 1. **Links**: every cross-unit reference becomes a marker string that is
//!    substituted with the producer's output once it has been applied
//! 2. **Graph**: links and `depends_on` entries form a dependency map that
//!    is checked for cycles and walked by the scheduler
//! 3. **Plan**: the live project is diffed against the state snapshot of
//!    the last apply
//! 4. **Execution**: destroys run consumers first, applies run producers
//!    first, and the snapshot is saved after each phase
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, reference expansion and validation
//! - [`links`]: Link registry and marker substitution
//! - [`graph`]: Dependency checks and the execution scheduler
//! - [`unit`]: Unit contract and built-in unit kinds
//! - [`project`]: Units assembled from configuration or from state
//! - [`planner`]: Diff computation, plans and plan execution
//! - [`state`]: State snapshot and storage backends (local, S3)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: my-stack
//!
//! stacks:
//!   - name: infra
//!     units:
//!       - name: net
//!         type: printer
//!         outputs: { subnet_id: subnet-1 }
//!   - name: app
//!     units:
//!       - name: web
//!         type: shell
//!         env: { SUBNET: '{{ output "infra.net.subnet_id" }}' }
//!         apply: [ "echo url=http://$SUBNET.local" ]
//!         outputs: [ url ]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod links;
pub mod planner;
pub mod project;
pub mod state;
pub mod unit;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, ProjectConfig};
pub use error::{Result, StackforgeError};
pub use graph::{DependencyMap, ScheduleMode, Scheduler};
pub use links::{Link, LinkRegistry, LinkType};
pub use planner::{DiffEngine, PlanExecutor, ProjectPlan, UnitOperation};
pub use project::{Project, TargetFilter};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
pub use unit::{ExecContext, Unit, UnitRegistry};
