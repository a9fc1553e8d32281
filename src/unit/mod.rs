//! Unit capability contract.
//!
//! A unit is the atomic schedulable entity of a project. The scheduler and
//! the plan engine only ever see `Arc<dyn Unit>`; concrete kinds are
//! registered in a [`UnitRegistry`] and looked up by their `type` string.

mod printer;
mod registry;
mod shell;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::links::{resolve_outputs, with_placeholders, LinkRegistry};

pub use printer::PrinterUnit;
pub use registry::{UnitFactory, UnitRegistry};
pub use shell::ShellUnit;

/// Outputs produced by a successful apply, keyed by output name.
pub type UnitOutputs = IndexMap<String, Value>;

/// Everything needed to construct a unit, from configuration or from state.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDefinition {
    /// Stack the unit belongs to.
    pub stack: String,
    /// Unit name, unique within its stack.
    pub name: String,
    /// Registered kind.
    pub kind: String,
    /// Re-apply whenever a dependency changes.
    pub force_apply: bool,
    /// Previous apply did not complete cleanly.
    pub tainted: bool,
    /// Kind-specific data, possibly containing markers.
    pub data: Value,
}

impl UnitDefinition {
    /// Unit key (`stack.name`).
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.stack, self.name)
    }
}

/// Persisted state of one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    /// Unit kind used to restore the unit.
    #[serde(rename = "type")]
    pub kind: String,
    /// Previous apply did not complete cleanly.
    #[serde(default)]
    pub tainted: bool,
    /// Force-apply flag at the time of the apply.
    #[serde(default)]
    pub force_apply: bool,
    /// Opaque kind-specific data.
    #[serde(default)]
    pub data: Value,
    /// Keys of units this one was ordered after through `depends_on`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Outputs produced by the last successful apply.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: UnitOutputs,
}

impl StateRecord {
    /// Rebuilds the unit definition this record was saved from.
    #[must_use]
    pub fn to_definition(&self, key: &str) -> UnitDefinition {
        let (stack, name) = key.split_once('.').unwrap_or(("", key));
        UnitDefinition {
            stack: stack.to_string(),
            name: name.to_string(),
            kind: self.kind.clone(),
            force_apply: self.force_apply,
            tainted: self.tainted,
            data: self.data.clone(),
        }
    }
}

/// Shared execution context handed to unit lifecycle calls.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    interrupted: Arc<AtomicBool>,
    init_lock: Arc<Mutex<HashSet<String>>>,
    working_dir: PathBuf,
}

impl ExecContext {
    /// Creates a context rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Shares an externally owned interrupt flag.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Returns true once an interrupt was observed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Raises the interrupt flag.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// The interrupt flag, for sharing with the scheduler or a signal handler.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Acquires the process-wide initialization lock.
    ///
    /// The guarded set records which one-time setups already ran.
    pub async fn init_lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.init_lock.lock().await
    }

    /// Directory commands run in.
    #[must_use]
    pub const fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }
}

/// The capability set every unit kind implements.
#[async_trait]
pub trait Unit: Send + Sync + std::fmt::Debug {
    /// Stack name.
    fn stack(&self) -> &str;

    /// Unit name.
    fn name(&self) -> &str;

    /// Registered kind.
    fn kind(&self) -> &'static str;

    /// Configuration data, possibly containing markers.
    fn spec_data(&self) -> &Value;

    /// Re-apply whenever a dependency changes.
    fn force_apply(&self) -> bool;

    /// Previous apply did not complete cleanly.
    fn tainted(&self) -> bool;

    /// Unit key (`stack.name`).
    fn key(&self) -> String {
        format!("{}.{}", self.stack(), self.name())
    }

    /// Produces the artifact handed to the provisioner by resolving markers.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be built.
    fn build(&self, links: &LinkRegistry) -> Result<Value> {
        Ok(resolve_outputs(self.spec_data(), links, &self.key())?)
    }

    /// Applies the built artifact and returns the produced outputs.
    async fn apply(&self, artifact: &Value, ctx: &ExecContext) -> Result<UnitOutputs>;

    /// Shows what applying the artifact would do.
    async fn plan(&self, artifact: &Value, ctx: &ExecContext) -> Result<String>;

    /// Tears down what the artifact describes.
    async fn destroy(&self, artifact: &Value, ctx: &ExecContext) -> Result<()>;

    /// State record to persist after a successful apply.
    fn get_state(&self) -> StateRecord {
        StateRecord {
            kind: self.kind().to_string(),
            tainted: false,
            force_apply: self.force_apply(),
            data: self.spec_data().clone(),
            depends_on: Vec::new(),
            outputs: UnitOutputs::new(),
        }
    }

    /// Deterministic projection used for change detection.
    fn get_diff_data(&self, links: &LinkRegistry) -> Value {
        with_placeholders(self.spec_data(), links)
    }
}
