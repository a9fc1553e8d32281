//! Configuration validation for project files.
//!
//! This module validates a parsed project configuration before any unit is
//! constructed, collecting every error and warning in one pass.

use crate::error::{ConfigError, Result, StackforgeError};
use crate::unit::UnitRegistry;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{ProjectConfig, ProjectSettings, StackConfig, StateBackend, StateConfig};
use super::template::THIS_STACK;

/// Validator for project configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Unit kinds that can be constructed.
    known_kinds: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator accepting the built-in unit kinds.
    #[must_use]
    pub fn new() -> Self {
        Self::for_registry(&UnitRegistry::with_builtin())
    }

    /// Creates a validator accepting the kinds of the given registry.
    #[must_use]
    pub fn for_registry(registry: &UnitRegistry) -> Self {
        Self {
            known_kinds: registry.kinds().into_iter().map(String::from).collect(),
        }
    }

    /// Validates a project configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails. Use [`Self::check`] to
    /// get every error.
    pub fn validate(&self, config: &ProjectConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackforgeError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    /// Collects all errors and warnings without failing.
    #[must_use]
    pub fn check(&self, config: &ProjectConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        self.validate_stacks(&config.stacks, &mut result);

        result
    }

    /// Validates project settings.
    fn validate_project(project: &ProjectSettings, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.parallelism == 0 {
            result.error("project.parallelism", "Parallelism must be at least 1");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    /// Validates stacks and their units.
    fn validate_stacks(&self, stacks: &[StackConfig], result: &mut ValidationResult) {
        if stacks.is_empty() {
            result.warnings.push(String::from("No stacks defined in configuration"));
            return;
        }

        let mut seen_stacks = HashSet::new();
        for (i, stack) in stacks.iter().enumerate() {
            let prefix = format!("stacks[{i}]");

            if !seen_stacks.insert(stack.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate stack name: {}", stack.name),
                );
            }
            if !is_valid_name(&stack.name) || stack.name == THIS_STACK {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens and not '{THIS_STACK}'.",
                        stack.name
                    ),
                );
            }
            if stack.units.is_empty() {
                result
                    .warnings
                    .push(format!("Stack '{}' has no units", stack.name));
            }

            let mut seen_units = HashSet::new();
            for (j, unit) in stack.units.iter().enumerate() {
                let prefix = format!("{prefix}.units[{j}]");

                if !seen_units.insert(unit.name.as_str()) {
                    result.error(
                        format!("{prefix}.name"),
                        format!("Duplicate unit key: {}", unit.key(&stack.name)),
                    );
                }
                if !is_valid_name(&unit.name) {
                    result.error(
                        format!("{prefix}.name"),
                        format!(
                            "Unit name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                            unit.name
                        ),
                    );
                }
                if !self.known_kinds.contains(&unit.kind) {
                    result.error(
                        format!("{prefix}.type"),
                        format!("Unknown unit type '{}'", unit.kind),
                    );
                }
                for (k, entry) in unit.depends_on.iter().enumerate() {
                    if !is_valid_dependency(entry) {
                        result.error(
                            format!("{prefix}.depends_on[{k}]"),
                            format!("Dependency '{entry}' must be 'stack.unit' or 'this.unit'"),
                        );
                    }
                }
            }
        }
    }
}

/// Checks if a name is valid (lowercase alphanumeric with hyphens).
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

fn is_valid_dependency(entry: &str) -> bool {
    matches!(
        entry.split_once('.'),
        Some((stack, unit)) if !stack.is_empty() && !unit.is_empty() && !unit.contains('.')
    )
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
