//! Reference expansion.
//!
//! Turns `{{ output "stack.unit.output" }}` and
//! `{{ remoteState "stack.unit.output" }}` calls in unit data into markers
//! registered in the run's [`LinkRegistry`], and `depends_on` entries into
//! ordering-only links. `this` as a stack name means the unit's own stack.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{ConfigError, LinkError};
use crate::links::{scan, Link, LinkRegistry, MarkerVisitor};

/// Stack alias for the unit's own stack.
pub const THIS_STACK: &str = "this";

#[allow(clippy::expect_used)]
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*(output|remoteState)\s+"([^"]*)"\s*\}\}"#)
        .expect("reference pattern is valid")
});

/// Expands reference calls inside one unit's data.
#[derive(Debug)]
pub struct ReferenceExpander<'a> {
    links: &'a mut LinkRegistry,
    stack: &'a str,
    unit_key: &'a str,
    error: Option<ConfigError>,
}

impl<'a> ReferenceExpander<'a> {
    /// Creates an expander for the unit `unit_key` in `stack`.
    pub const fn new(links: &'a mut LinkRegistry, stack: &'a str, unit_key: &'a str) -> Self {
        Self {
            links,
            stack,
            unit_key,
            error: None,
        }
    }

    /// Rewrites every reference call in `data` into its marker.
    ///
    /// # Errors
    ///
    /// Returns an error on the first malformed reference.
    pub fn expand(mut self, data: &mut Value) -> Result<(), ConfigError> {
        scan(data, &mut self).map_err(|e| self.link_error(&e))?;
        self.error.map_or(Ok(()), Err)
    }

    /// Registers a `depends_on` entry and returns its link.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is not `stack.unit`.
    pub fn depends_on(&mut self, entry: &str) -> Result<Link, ConfigError> {
        let parts: Vec<&str> = entry.split('.').collect();
        let [stack, unit] = parts.as_slice() else {
            return Err(ConfigError::invalid_reference(
                self.unit_key,
                entry,
                "expected 'stack.unit'",
            ));
        };
        if stack.is_empty() || unit.is_empty() {
            return Err(ConfigError::invalid_reference(self.unit_key, entry, "empty name"));
        }
        let link = Link::depends_on(self.resolve_stack(stack), unit);
        self.links
            .set(link.clone())
            .map_err(|e| self.link_error(&e))?;
        Ok(link)
    }

    fn resolve_stack<'s>(&'s self, stack: &'s str) -> &'s str {
        if stack == THIS_STACK { self.stack } else { stack }
    }

    fn link_error(&self, e: &LinkError) -> ConfigError {
        ConfigError::invalid_reference(self.unit_key, "", e.to_string())
    }

    fn marker_for(&mut self, function: &str, path: &str) -> Result<String, ConfigError> {
        let parts: Vec<&str> = path.split('.').collect();
        let (stack, unit, output) = match parts.as_slice() {
            [stack, unit, output] => (self.resolve_stack(stack).to_string(), *unit, *output),
            [unit, output] => (self.stack.to_string(), *unit, *output),
            _ => {
                return Err(ConfigError::invalid_reference(
                    self.unit_key,
                    path,
                    "expected 'stack.unit.output' or 'unit.output'",
                ));
            }
        };
        let link = if function == "remoteState" {
            Link::remote_state(&stack, unit, output)
        } else {
            Link::output(&stack, unit, output)
        };
        self.links.set(link).map_err(|e| {
            ConfigError::invalid_reference(self.unit_key, path, e.to_string())
        })
    }
}

impl MarkerVisitor for ReferenceExpander<'_> {
    fn visit(&mut self, text: &str) -> Result<Option<Value>, LinkError> {
        if self.error.is_some() || !REFERENCE.is_match(text) {
            return Ok(None);
        }

        let mut failure = None;
        let expanded = REFERENCE.replace_all(text, |caps: &Captures<'_>| {
            match self.marker_for(&caps[1], &caps[2]) {
                Ok(marker) => marker,
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                    String::new()
                }
            }
        });

        if let Some(e) = failure {
            self.error = Some(e);
            return Ok(None);
        }
        Ok(Some(Value::String(expanded.into_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expands_output_references() {
        let mut links = LinkRegistry::new();
        let mut data = json!({
            "id": "{{ output \"infra.vpc.vpc_id\" }}",
            "url": "http://{{ output \"this.lb.host\" }}:80",
            "short": "{{ remoteState \"db.port\" }}"
        });

        ReferenceExpander::new(&mut links, "app", "app.web")
            .expand(&mut data)
            .expect("expand");

        assert_eq!(links.len(), 3);
        let vpc = Link::output("infra", "vpc", "vpc_id").marker().expect("marker");
        let lb = Link::output("app", "lb", "host").marker().expect("marker");
        let db = Link::remote_state("app", "db", "port").marker().expect("marker");
        assert_eq!(data["id"], json!(vpc));
        assert_eq!(data["url"], json!(format!("http://{lb}:80")));
        assert_eq!(data["short"], json!(db));
    }

    #[test]
    fn test_rejects_malformed_reference() {
        let mut links = LinkRegistry::new();
        let mut data = json!(["{{ output \"just-a-name\" }}"]);
        let err = ReferenceExpander::new(&mut links, "app", "app.web")
            .expand(&mut data)
            .expect_err("malformed");
        assert!(err.to_string().contains("just-a-name"));
    }

    #[test]
    fn test_depends_on() {
        let mut links = LinkRegistry::new();
        let mut expander = ReferenceExpander::new(&mut links, "app", "app.web");
        let link = expander.depends_on("this.db").expect("depends_on");
        assert_eq!(link.target_key(), "app.db");
        assert!(expander.depends_on("db").is_err());
        assert!(expander.depends_on("a.b.c").is_err());
    }
}
