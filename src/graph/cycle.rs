//! Cycle detection over the dependency map.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, GraphError};

use super::DependencyMap;

/// Safety limit for the depth of a dependency walk.
pub const MAX_DEPENDENCY_DEPTH: usize = 1024;

/// Depth-first walker that rejects cycles and unknown dependencies.
#[derive(Debug)]
pub struct DependencyChecker<'a> {
    deps: &'a DependencyMap,
    max_depth: usize,
    verified: HashSet<&'a str>,
}

impl<'a> DependencyChecker<'a> {
    /// Creates a checker over a dependency map.
    #[must_use]
    pub fn new(deps: &'a DependencyMap) -> Self {
        Self {
            deps,
            max_depth: MAX_DEPENDENCY_DEPTH,
            verified: HashSet::new(),
        }
    }

    /// Overrides the depth limit.
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Walks everything reachable from `key`.
    ///
    /// # Errors
    ///
    /// Returns the cycle chain, an unknown dependency, or a depth overflow.
    pub fn check_unit(&mut self, key: &'a str) -> Result<(), GraphError> {
        let mut path = Vec::new();
        self.walk(key, &mut path)
    }

    /// Walks every unit of the map.
    ///
    /// # Errors
    ///
    /// Returns the first failure wrapped with the unit the walk started from.
    pub fn check_all(&mut self) -> Result<(), ConfigError> {
        let deps = self.deps;
        for key in deps.keys() {
            self.check_unit(key)
                .map_err(|cause| ConfigError::UnresolvedDependency {
                    unit: key.clone(),
                    cause,
                })?;
        }
        debug!("Dependency graph of {} unit(s) is acyclic", deps.len());
        Ok(())
    }

    fn walk(&mut self, key: &'a str, path: &mut Vec<&'a str>) -> Result<(), GraphError> {
        if self.verified.contains(key) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|k| *k == key) {
            let mut chain: Vec<String> = path[start..].iter().map(|k| (*k).to_string()).collect();
            chain.push(key.to_string());
            return Err(GraphError::Cycle { chain });
        }
        if path.len() >= self.max_depth {
            return Err(GraphError::DepthExceeded {
                unit: key.to_string(),
                max_depth: self.max_depth,
            });
        }

        let deps = self.deps;
        let Some(children) = deps.get(key) else {
            return Ok(());
        };

        path.push(key);
        for child in children {
            if !deps.contains_key(child) {
                return Err(GraphError::UnknownDependency {
                    unit: key.to_string(),
                    dependency: child.clone(),
                });
            }
            self.walk(child, path)?;
        }
        path.pop();

        self.verified.insert(key);
        Ok(())
    }
}

/// Checks that the dependency map is acyclic and closed.
///
/// # Errors
///
/// Returns [`ConfigError::UnresolvedDependency`] naming the unit whose walk
/// failed.
pub fn check_dependencies(deps: &DependencyMap) -> Result<(), ConfigError> {
    DependencyChecker::new(deps).check_all()
}
