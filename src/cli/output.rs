//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ProjectConfig, ValidationResult};
use crate::planner::{ExecutionResult, ProjectPlan, UnitOperation};
use crate::state::StateSnapshot;
use crate::unit::UnitOutputs;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// One row of the plan table; each column lists units of one operation.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Will be deployed")]
    deployed: String,
    #[tabled(rename = "Will be updated")]
    updated: String,
    #[tabled(rename = "Will be destroyed")]
    destroyed: String,
    #[tabled(rename = "Unchanged")]
    unchanged: String,
}

/// Unit row for state display.
#[derive(Tabled)]
struct StateUnitRow {
    #[tabled(rename = "Unit")]
    key: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Outputs")]
    outputs: usize,
    #[tabled(rename = "Status")]
    status: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ProjectPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ProjectPlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!("{} No changes, nothing to do.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan for {}\n", plan.project.bold());
        if !plan.config_hash.is_empty() {
            let _ = write!(
                output,
                "   Config hash: {}\n\n",
                &plan.config_hash[..8.min(plan.config_hash.len())]
            );
        }

        let column = |keep: fn(UnitOperation) -> bool| -> Vec<String> {
            plan.units
                .iter()
                .filter(|u| keep(u.operation))
                .map(crate::planner::UnitPlan::display_key)
                .collect()
        };
        let deployed = column(|op| op == UnitOperation::Apply);
        let updated = column(|op| matches!(op, UnitOperation::Update | UnitOperation::UpdateAsDep));
        let destroyed = column(|op| op == UnitOperation::Destroy);
        let unchanged = column(|op| op == UnitOperation::NotChanged);

        let height = deployed
            .len()
            .max(updated.len())
            .max(destroyed.len())
            .max(unchanged.len());
        let rows: Vec<PlanRow> = (0..height)
            .map(|i| PlanRow {
                deployed: Self::cell(&deployed, i),
                updated: Self::cell(&updated, i),
                destroyed: Self::cell(&destroyed, i),
                unchanged: Self::cell(&unchanged, i),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for unit in plan.units.iter().filter(|u| u.operation.is_change()) {
                let _ = write!(
                    output,
                    "\n{} {}\n",
                    Self::format_operation(unit.operation),
                    unit.display_key().bold()
                );
                if let Some(reason) = &unit.reason {
                    let _ = writeln!(output, "   {}", reason.dimmed());
                }
                for line in unit.diff.lines() {
                    let _ = writeln!(output, "   {}", Self::colorize_diff_line(line));
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to deploy, {} to update, {} to destroy, {} unchanged\n",
            plan.count(UnitOperation::Apply).to_string().green(),
            (plan.count(UnitOperation::Update) + plan.count(UnitOperation::UpdateAsDep))
                .to_string()
                .yellow(),
            plan.count(UnitOperation::Destroy).to_string().red(),
            plan.count(UnitOperation::NotChanged)
        );

        output
    }

    fn cell(column: &[String], row: usize) -> String {
        column.get(row).cloned().unwrap_or_default()
    }

    /// Formats the answers of units asked what their apply would do.
    #[must_use]
    pub fn format_unit_plans(&self, plans: &[(String, String)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let map: IndexMap<&str, &str> =
                    plans.iter().map(|(k, p)| (k.as_str(), p.as_str())).collect();
                serde_json::to_string_pretty(&map).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (key, text) in plans {
                    let _ = write!(output, "\n{}\n", format!("--- {key} ---").bold());
                    let _ = writeln!(output, "{}", text.trim_end());
                }
                output
            }
        }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &ProjectConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "project": config.project.name,
                    "stacks": config.stacks.len(),
                    "units": config.unit_count(),
                    "errors": result
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "  - {}: {}", error.field, error.message);
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  - {warning}");
                    }
                }

                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "  Project: {}", config.project.name);
                let _ = writeln!(output, "  Stacks: {}", config.stacks.len());
                let _ = writeln!(output, "  Units: {}", config.unit_count());
                let _ = writeln!(output, "  Parallelism: {}", config.project.parallelism);

                output
            }
        }
    }

    /// Formats the state snapshot.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.project);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    &state.config_hash[..8.min(state.config_hash.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Units: {}", state.units.len());
                let _ = writeln!(output, "   Links: {}", state.unit_links.len());

                if !state.units.is_empty() {
                    let rows: Vec<StateUnitRow> = state
                        .units
                        .iter()
                        .map(|(key, record)| StateUnitRow {
                            key: key.clone(),
                            kind: record.kind.clone(),
                            outputs: record.outputs.len(),
                            status: if record.tainted {
                                "tainted".red().to_string()
                            } else {
                                "applied".green().to_string()
                            },
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.units.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats published outputs, one block per unit.
    #[must_use]
    pub fn format_outputs(&self, outputs: &[(String, UnitOutputs)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let map: IndexMap<&str, &UnitOutputs> =
                    outputs.iter().map(|(k, o)| (k.as_str(), o)).collect();
                serde_json::to_string_pretty(&map).unwrap_or_default()
            }
            OutputFormat::Text => {
                if outputs.iter().all(|(_, o)| o.is_empty()) {
                    return "No outputs recorded.\n".to_string();
                }
                let mut output = String::new();
                for (key, values) in outputs.iter().filter(|(_, o)| !o.is_empty()) {
                    let _ = writeln!(output, "{}", key.bold());
                    for (name, value) in values {
                        let _ = writeln!(output, "  {name} = {}", Self::format_value(value));
                    }
                }
                output
            }
        }
    }

    /// Formats built artifacts.
    #[must_use]
    pub fn format_artifacts(&self, artifacts: &[(String, Value)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let map: IndexMap<&str, &Value> =
                    artifacts.iter().map(|(k, a)| (k.as_str(), a)).collect();
                serde_json::to_string_pretty(&map).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (key, artifact) in artifacts {
                    let _ = write!(output, "\n{}\n", format!("--- {key} ---").bold());
                    let _ = write!(output, "{}", serde_yaml::to_string(artifact).unwrap_or_default());
                }
                output
            }
        }
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_result(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => format!("{} Run complete: {result}\n", "✓".green()),
        }
    }

    /// Formats an operation with color.
    fn format_operation(operation: UnitOperation) -> String {
        match operation {
            UnitOperation::Apply => "+deploy".green().to_string(),
            UnitOperation::Update => "~update".yellow().to_string(),
            UnitOperation::UpdateAsDep => "~update (dependency)".yellow().to_string(),
            UnitOperation::Destroy => "-destroy".red().to_string(),
            UnitOperation::NotChanged => "unchanged".dimmed().to_string(),
        }
    }

    /// Colors one line of a rendered diff by its prefix.
    fn colorize_diff_line(line: &str) -> String {
        if line.starts_with("+ ") {
            line.green().to_string()
        } else if line.starts_with("- ") {
            line.red().to_string()
        } else {
            line.to_string()
        }
    }

    /// Renders an output value without quoting plain strings.
    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, symbol: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }
}
