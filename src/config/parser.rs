//! Configuration parser for loading project files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StackforgeError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::ProjectConfig;

/// Configuration parser for loading project configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ProjectConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StackforgeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StackforgeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ProjectConfig> {
        debug!("Parsing YAML configuration");

        let config: ProjectConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StackforgeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed project {} with {} unit(s)",
            config.project.name,
            config.unit_count()
        );
        Ok(config)
    }

    /// Loads configuration with `.env` and environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STACKFORGE_<SECTION>_<KEY>` (e.g., `STACKFORGE_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override has an unusable value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ProjectConfig> {
        self.load_dotenv()?;
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `STACKFORGE_PARALLELISM` is not a positive integer.
    pub fn apply_env_overrides(config: &mut ProjectConfig) -> Result<()> {
        if let Ok(name) = std::env::var("STACKFORGE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(value) = std::env::var("STACKFORGE_PARALLELISM") {
            debug!("Overriding project.parallelism from environment");
            config.project.parallelism = value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnvVar {
                    name: String::from("STACKFORGE_PARALLELISM"),
                    value,
                })?;
        }

        if let Ok(bucket) = std::env::var("STACKFORGE_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("STACKFORGE_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Ok(region) = std::env::var("STACKFORGE_STATE_REGION") {
            debug!("Overriding state.region from environment");
            config.state.region = Some(region);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StackforgeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["stackforge.yaml", "stackforge.yml", "project.yaml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StackforgeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::StateBackend;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.parallelism, 3);
        assert_eq!(config.state.backend, StateBackend::Local);
        assert!(config.stacks.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
project:
  name: demo
  parallelism: 2
state:
  backend: s3
  bucket: demo-state
  prefix: demo/
stacks:
  - name: infra
    units:
      - name: net
        type: printer
        outputs:
          subnet_id: subnet-1
      - name: db
        type: shell
        force_apply: true
        depends_on: ["this.net"]
        env:
          SUBNET: '{{ output "this.net.subnet_id" }}'
        apply: ["echo endpoint=db.local"]
        outputs: ["endpoint"]
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.project.parallelism, 2);
        assert_eq!(config.state.bucket.as_deref(), Some("demo-state"));
        assert_eq!(config.unit_count(), 2);
        assert_eq!(config.unit_keys(), vec!["infra.net", "infra.db"]);

        let db = &config.stacks[0].units[1];
        assert_eq!(db.kind, "shell");
        assert!(db.force_apply);
        assert_eq!(db.depends_on, vec!["this.net"]);
        assert!(db.data.contains_key("env"));
        assert!(!db.data.contains_key("type"));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("broken.yaml")))
            .expect_err("invalid yaml");
        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        std::fs::write(temp.path().join("stackforge.yml"), "project:\n  name: x\n")
            .expect("write config");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let found = find_config_file(&nested).expect("config found");
        assert_eq!(found, temp.path().join("stackforge.yml"));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().expect("temp dir");
        let result = ConfigParser::new().load_file(temp.path().join("nope.yaml"));
        assert!(matches!(
            result,
            Err(StackforgeError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
