//! Error types for the Stackforge orchestration engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, link resolution, graph validation, scheduling, unit
//! execution, planning, and state management.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Stackforge.
#[derive(Debug, Error)]
pub enum StackforgeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Link and marker errors.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Dependency graph and scheduling errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Unit execution errors.
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable has an unusable value.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// Duplicate definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (stack, unit).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A reference or `depends_on` entry is malformed.
    #[error("Invalid reference '{reference}' in unit {unit}: {reason}")]
    InvalidReference {
        /// Key of the unit holding the reference.
        unit: String,
        /// The raw reference text.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No factory registered for a unit kind.
    #[error("Unknown unit type '{kind}' for unit {unit}")]
    UnknownUnitKind {
        /// Key of the unit.
        unit: String,
        /// The unregistered kind.
        kind: String,
    },

    /// A unit's dependencies could not be resolved.
    #[error("unresolved dependency in unit {unit}: {cause}")]
    UnresolvedDependency {
        /// Key of the unit whose dependency walk failed.
        unit: String,
        /// The underlying graph error.
        cause: GraphError,
    },
}

/// Link and marker errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A link tuple is missing a mandatory field.
    #[error("Cannot create marker: empty {field}")]
    EmptyField {
        /// Name of the empty field.
        field: &'static str,
    },

    /// A marker points to a unit that does not exist.
    #[error("Dangling reference in unit {unit}: target unit {target} not found")]
    DanglingReference {
        /// Key of the consuming unit.
        unit: String,
        /// Key of the missing target.
        target: String,
    },

    /// A marker survived the build phase.
    #[error("Unprocessed marker in unit {unit}: {marker}")]
    UnprocessedMarker {
        /// Key of the unit being built.
        unit: String,
        /// The marker text left in the artifact.
        marker: String,
    },

    /// A link with the same marker already exists.
    #[error("Link already registered: {marker}")]
    AlreadyExists {
        /// The duplicate marker.
        marker: String,
    },
}

/// A single unit failure collected by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UnitFailure {
    /// Key of the failed unit.
    pub key: String,
    /// Error message.
    pub message: String,
}

/// Dependency graph and scheduling errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A dependency cycle was found.
    #[error("loop: {}", .chain.join(" -> "))]
    Cycle {
        /// Unit keys forming the loop; the first key is repeated at the end.
        chain: Vec<String>,
    },

    /// A dependency points to an unknown unit.
    #[error("unit {unit} depends on unknown unit {dependency}")]
    UnknownDependency {
        /// Key of the consuming unit.
        unit: String,
        /// Key of the missing dependency.
        dependency: String,
    },

    /// The dependency walk exceeded the safety depth.
    #[error("dependency chain deeper than {max_depth} levels at unit {unit}")]
    DepthExceeded {
        /// Unit where the limit was hit.
        unit: String,
        /// The configured limit.
        max_depth: usize,
    },

    /// Units remained in the backlog after the indexing pass.
    #[error("the graph is broken, units never became ready: {}", .pending.join(", "))]
    Broken {
        /// Keys of the stuck units.
        pending: Vec<String>,
    },

    /// The run was interrupted before all units were dispatched.
    #[error("interrupted")]
    Interrupted,

    /// One or more units failed.
    #[error("{} unit(s) failed:\n{}", .failures.len(), format_failures(.failures))]
    UnitsFailed {
        /// All collected unit failures.
        failures: Vec<UnitFailure>,
    },
}

/// Unit execution errors.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit failed to build its artifact.
    #[error("build of {unit} failed: {message}")]
    Build {
        /// Unit key.
        unit: String,
        /// Failure description.
        message: String,
    },

    /// An external command exited unsuccessfully.
    #[error("command '{command}' in unit {unit} failed: {message}")]
    CommandFailed {
        /// Unit key.
        unit: String,
        /// The command line.
        command: String,
        /// Exit status or spawn error.
        message: String,
    },

    /// A declared output was not produced.
    #[error("unit {unit} did not produce output '{output}'")]
    MissingOutput {
        /// Unit key.
        unit: String,
        /// Name of the missing output.
        output: String,
    },

    /// A persisted state blob could not be decoded.
    #[error("invalid state for unit {unit}: {message}")]
    InvalidState {
        /// Unit key.
        unit: String,
        /// Decoding error.
        message: String,
    },

    /// The unit was not started because the run was interrupted.
    #[error("unit {unit} skipped: run interrupted")]
    Interrupted {
        /// Unit key.
        unit: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local backend IO error.
    #[error("Local state backend error: {message}")]
    LocalIo {
        /// Description of the IO error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The run was aborted by the user or by a failed phase.
    #[error("{reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// A unit selected by a target filter does not exist.
    #[error("Target '{target}' matches no unit")]
    UnknownTarget {
        /// The unmatched target expression.
        target: String,
    },
}

/// Result type alias for Stackforge operations.
pub type Result<T> = std::result::Result<T, StackforgeError>;

fn format_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  {}: {}", f.key, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

impl StackforgeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid reference error.
    #[must_use]
    pub fn invalid_reference(
        unit: impl Into<String>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidReference {
            unit: unit.into(),
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local backend error with the given message.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalIo {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl UnitError {
    /// Creates a build error.
    #[must_use]
    pub fn build(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            unit: unit.into(),
            message: message.into(),
        }
    }
}
