//! Registry of unit kinds.

use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::printer::PrinterUnit;
use super::shell::ShellUnit;
use super::{StateRecord, Unit, UnitDefinition};

/// Constructor for one unit kind.
pub type UnitFactory = Box<dyn Fn(UnitDefinition) -> Result<Arc<dyn Unit>> + Send + Sync>;

/// Maps a unit `type` string to its constructor.
pub struct UnitRegistry {
    factories: IndexMap<String, UnitFactory>,
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Creates a registry with the built-in `printer` and `shell` kinds.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            PrinterUnit::KIND,
            Box::new(|def: UnitDefinition| -> Result<Arc<dyn Unit>> {
                let unit: Arc<dyn Unit> = Arc::new(PrinterUnit::new(def));
                Ok(unit)
            }),
        );
        registry.register(
            ShellUnit::KIND,
            Box::new(|def: UnitDefinition| -> Result<Arc<dyn Unit>> {
                let unit: Arc<dyn Unit> = Arc::new(ShellUnit::new(def)?);
                Ok(unit)
            }),
        );
        registry
    }

    /// Registers (or replaces) a unit kind.
    pub fn register(&mut self, kind: impl Into<String>, factory: UnitFactory) {
        let kind = kind.into();
        debug!("Registering unit kind: {kind}");
        self.factories.insert(kind, factory);
    }

    /// Returns true if the kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, in registration order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Constructs a unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is unknown or the data is invalid for it.
    pub fn create(&self, def: UnitDefinition) -> Result<Arc<dyn Unit>> {
        let factory = self.factories.get(&def.kind).ok_or_else(|| ConfigError::UnknownUnitKind {
            unit: def.key(),
            kind: def.kind.clone(),
        })?;
        factory(def)
    }

    /// Restores a unit from its persisted state record.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded kind is unknown or its data is invalid.
    pub fn restore(&self, key: &str, record: &StateRecord) -> Result<Arc<dyn Unit>> {
        self.create(record.to_definition(key))
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
