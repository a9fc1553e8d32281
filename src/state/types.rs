//! State snapshot types.
//!
//! The snapshot is the persisted project: every applied unit's state record
//! and the link registry holding their published outputs. It is loaded once
//! per run, compared against the live configuration, and written back after
//! each execution phase.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::StateStore;
use crate::error::{Result, StateError};
use crate::links::LinkRegistry;
use crate::unit::StateRecord;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept in the snapshot.
pub const MAX_HISTORY: usize = 100;

/// The persisted project state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    #[serde(default)]
    pub project: String,
    /// Stable identifier of the project, created on first load.
    #[serde(default)]
    pub project_uuid: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Links with the output data of applied units.
    #[serde(default)]
    pub unit_links: LinkRegistry,
    /// State record of every applied unit, by key.
    #[serde(default)]
    pub units: IndexMap<String, StateRecord>,
    /// When the state was last updated.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
    /// Units written during the current run.
    #[serde(skip)]
    pub changed_units: IndexSet<String>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Units the run touched.
    pub units: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Apply run (destroy phase plus apply phase).
    Apply,
    /// Destroy of the whole project.
    Destroy,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            project_uuid: Uuid::new_v4().to_string(),
            config_hash: String::new(),
            unit_links: LinkRegistry::new(),
            units: IndexMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
            changed_units: IndexSet::new(),
        }
    }

    /// Parses a serialized snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has an
    /// incompatible major version.
    pub fn from_json(content: &str) -> std::result::Result<Self, StateError> {
        let mut snapshot: Self = serde_json::from_str(content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })?;

        let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
        if major(&snapshot.version) != major(STATE_VERSION) {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: snapshot.version,
            });
        }

        if snapshot.project_uuid.is_empty() {
            snapshot.project_uuid = Uuid::new_v4().to_string();
            debug!("Assigned project uuid {}", snapshot.project_uuid);
        }
        Ok(snapshot)
    }

    /// Serializes the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> std::result::Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))
    }

    /// Loads the snapshot from a backend, or creates an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the document is invalid.
    pub async fn load<S: StateStore + ?Sized>(store: &S, project: &str) -> Result<Self> {
        match store.read_state().await? {
            Some(content) => {
                let snapshot = Self::from_json(&content)?;
                info!(
                    "Loaded state with {} unit(s) from {}",
                    snapshot.units.len(),
                    store.location()
                );
                Ok(snapshot)
            }
            None => {
                debug!("No state found, starting from an empty snapshot");
                Ok(Self::new(project))
            }
        }
    }

    /// Drops links to absent units and writes the whole document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend fails.
    pub async fn save<S: StateStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.clear_links();
        self.last_updated = Utc::now();
        let content = self.to_json()?;
        store.write_state(&content).await
    }

    /// Removes links whose target unit is not in the snapshot.
    pub fn clear_links(&mut self) {
        let units = &self.units;
        self.unit_links.retain_targets(|key| units.contains_key(key));
    }

    /// Records a unit as applied in this run.
    pub fn update_unit(&mut self, key: &str, record: StateRecord) {
        self.units.insert(key.to_string(), record);
        self.changed_units.insert(key.to_string());
        self.last_updated = Utc::now();
    }

    /// Records a failed apply: the unit is kept with its tainted flag set.
    pub fn mark_tainted(&mut self, key: &str, mut record: StateRecord) {
        record.tainted = true;
        self.update_unit(key, record);
    }

    /// Removes a destroyed unit.
    pub fn delete_unit(&mut self, key: &str) -> Option<StateRecord> {
        let removed = self.units.shift_remove(key);
        if removed.is_some() {
            self.changed_units.insert(key.to_string());
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Publishes outputs of a unit into the snapshot's links.
    pub fn publish_outputs(&mut self, key: &str, outputs: &IndexMap<String, Value>) {
        let missing = self.unit_links.set_output_data(key, outputs);
        if !missing.is_empty() {
            debug!("Unit {key} did not publish: {}", missing.join(", "));
        }
    }

    /// Outputs of a unit recorded in the snapshot.
    ///
    /// Prefers the outputs saved with the unit's record and falls back to
    /// the values held by links.
    #[must_use]
    pub fn outputs_of(&self, key: &str) -> IndexMap<String, Value> {
        match self.units.get(key) {
            Some(record) if !record.outputs.is_empty() => record.outputs.clone(),
            _ => self.unit_links.outputs_of(key),
        }
    }

    /// Returns true if the unit was written during the current run.
    #[must_use]
    pub fn was_changed(&self, key: &str) -> bool {
        self.changed_units.contains(key)
    }

    /// Adds a history entry, keeping only the last [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns true if no unit is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl RunHistoryEntry {
    /// Creates a history entry stamped now.
    #[must_use]
    pub fn new(
        operation: RunOperation,
        config_hash: &str,
        units: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            units,
            success: error.is_none(),
            error,
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}
