//! The `shell` unit kind.
//!
//! Runs command lists through `sh -c`. Lines printed as `name=value` on
//! stdout become outputs when `name` is declared in `outputs`.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, UnitError};

use super::{ExecContext, Unit, UnitDefinition, UnitOutputs};

/// Command lists and environment of a shell unit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellSpec {
    /// Extra environment variables; non-string values are JSON-encoded.
    #[serde(default)]
    env: IndexMap<String, Value>,
    /// One-time setup, run once per process under the init lock.
    #[serde(default)]
    init: Vec<String>,
    /// Commands run on apply.
    #[serde(default)]
    apply: Vec<String>,
    /// Commands run on plan.
    #[serde(default)]
    plan: Vec<String>,
    /// Commands run on destroy.
    #[serde(default)]
    destroy: Vec<String>,
    /// Declared output names.
    #[serde(default)]
    outputs: Vec<String>,
    /// Working directory, relative to the project directory.
    #[serde(default)]
    work_dir: Option<PathBuf>,
}

/// Unit backed by shell commands.
#[derive(Debug)]
pub struct ShellUnit {
    def: UnitDefinition,
}

impl ShellUnit {
    /// Kind name used in configuration.
    pub const KIND: &'static str = "shell";

    /// Creates a shell unit, validating the shape of its data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data does not describe a shell unit.
    pub fn new(def: UnitDefinition) -> Result<Self> {
        let unit = Self { def };
        unit.parse(&unit.def.data)?;
        Ok(unit)
    }

    fn parse(&self, data: &Value) -> Result<ShellSpec> {
        if data.is_null() {
            return Ok(ShellSpec::default());
        }
        serde_json::from_value(data.clone())
            .map_err(|e| UnitError::build(self.key(), format!("invalid shell unit: {e}")).into())
    }

    /// Runs a command list, returning the captured stdout.
    async fn run_all(
        &self,
        commands: &[String],
        spec: &ShellSpec,
        ctx: &ExecContext,
    ) -> Result<String> {
        let dir = spec
            .work_dir
            .as_ref()
            .map_or_else(|| ctx.working_dir().clone(), |d| ctx.working_dir().join(d));

        let mut stdout = String::new();
        for command in commands {
            if ctx.is_interrupted() {
                return Err(UnitError::Interrupted { unit: self.key() }.into());
            }
            debug!("{}: running '{command}'", self.key());

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command).current_dir(&dir);
            for (name, value) in &spec.env {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(name, value);
            }

            let output = cmd.output().await.map_err(|e| UnitError::CommandFailed {
                unit: self.key(),
                command: command.clone(),
                message: e.to_string(),
            })?;

            if !output.status.success() {
                return Err(UnitError::CommandFailed {
                    unit: self.key(),
                    command: command.clone(),
                    message: format!(
                        "{}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                }
                .into());
            }
            stdout.push_str(&String::from_utf8_lossy(&output.stdout));
        }
        Ok(stdout)
    }

    /// Runs `init` once per process for identical setup commands.
    async fn ensure_init(&self, spec: &ShellSpec, ctx: &ExecContext) -> Result<()> {
        if spec.init.is_empty() {
            return Ok(());
        }
        let init_key = format!("{}:{}", Self::KIND, spec.init.join("\n"));
        let mut done = ctx.init_lock().await;
        if done.contains(&init_key) {
            return Ok(());
        }
        info!("{}: running one-time init", self.key());
        self.run_all(&spec.init, spec, ctx).await?;
        done.insert(init_key);
        Ok(())
    }
}

/// Extracts declared outputs from `name=value` lines; the last value wins.
fn parse_outputs(stdout: &str, declared: &[String]) -> UnitOutputs {
    let mut outputs = UnitOutputs::new();
    for line in stdout.lines() {
        if let Some((name, value)) = line.split_once('=') {
            let name = name.trim();
            if declared.iter().any(|d| d == name) {
                outputs.insert(name.to_string(), Value::String(value.trim().to_string()));
            }
        }
    }
    outputs
}

#[async_trait]
impl Unit for ShellUnit {
    fn stack(&self) -> &str {
        &self.def.stack
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn spec_data(&self) -> &Value {
        &self.def.data
    }

    fn force_apply(&self) -> bool {
        self.def.force_apply
    }

    fn tainted(&self) -> bool {
        self.def.tainted
    }

    async fn apply(&self, artifact: &Value, ctx: &ExecContext) -> Result<UnitOutputs> {
        let spec = self.parse(artifact)?;
        self.ensure_init(&spec, ctx).await?;

        let stdout = self.run_all(&spec.apply, &spec, ctx).await?;
        let outputs = parse_outputs(&stdout, &spec.outputs);

        if let Some(missing) = spec.outputs.iter().find(|name| !outputs.contains_key(*name)) {
            return Err(UnitError::MissingOutput {
                unit: self.key(),
                output: missing.clone(),
            }
            .into());
        }
        Ok(outputs)
    }

    async fn plan(&self, artifact: &Value, ctx: &ExecContext) -> Result<String> {
        let spec = self.parse(artifact)?;
        if spec.plan.is_empty() {
            return Ok(spec.apply.join("\n"));
        }
        self.ensure_init(&spec, ctx).await?;
        self.run_all(&spec.plan, &spec, ctx).await
    }

    async fn destroy(&self, artifact: &Value, ctx: &ExecContext) -> Result<()> {
        let spec = self.parse(artifact)?;
        self.ensure_init(&spec, ctx).await?;
        self.run_all(&spec.destroy, &spec, ctx).await?;
        Ok(())
    }
}
