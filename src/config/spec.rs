//! Configuration specification types for a Stackforge project.
//!
//! This module defines the structs that map to the `stackforge.yaml` file.
//! A project is a list of stacks; a stack is a list of units. Everything a
//! unit kind needs beyond its identity stays in a free-form map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The root configuration structure for a Stackforge project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project-level settings.
    pub project: ProjectSettings,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Stacks of units.
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
}

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Unique name for the project.
    pub name: String,
    /// Maximum number of units executed at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// A named group of units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack name, unique within the project.
    pub name: String,
    /// Units of the stack.
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

/// Configuration of a single unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitConfig {
    /// Unit name, unique within its stack.
    pub name: String,
    /// Unit kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Re-apply whenever a dependency changes.
    #[serde(default)]
    pub force_apply: bool,
    /// Explicit ordering dependencies (`stack.unit` or `this.unit`).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Kind-specific settings.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

/// Default number of units run concurrently.
pub const DEFAULT_PARALLELISM: usize = 3;

impl ProjectConfig {
    /// Iterates over `(stack, unit)` pairs in declaration order.
    pub fn units(&self) -> impl Iterator<Item = (&StackConfig, &UnitConfig)> {
        self.stacks
            .iter()
            .flat_map(|stack| stack.units.iter().map(move |unit| (stack, unit)))
    }

    /// Returns the total number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.stacks.iter().map(|s| s.units.len()).sum()
    }

    /// Returns every unit key (`stack.unit`).
    #[must_use]
    pub fn unit_keys(&self) -> Vec<String> {
        self.units()
            .map(|(stack, unit)| unit.key(&stack.name))
            .collect()
    }
}

impl UnitConfig {
    /// Unit key within the given stack.
    #[must_use]
    pub fn key(&self, stack: &str) -> String {
        format!("{stack}.{}", self.name)
    }
}

impl std::fmt::Display for StateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::S3 => "s3",
        };
        write!(f, "{s}")
    }
}
