//! Configuration module for Stackforge projects.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackforge.yaml`
//! - Expanding `output`/`remoteState` references into markers
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod template;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    ProjectConfig, ProjectSettings, StackConfig, StateBackend, StateConfig, UnitConfig,
    DEFAULT_PARALLELISM,
};
pub use template::{ReferenceExpander, THIS_STACK};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
