//! Typed walking of configuration values for markers.
//!
//! Unit data is a `serde_json::Value` tree. String leaves are the only place
//! markers can live, so every scan mode is a [`MarkerVisitor`] that sees
//! string leaves and optionally returns a replacement value.

use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::error::LinkError;

use super::marker::{find_markers, Link};
use super::registry::LinkRegistry;

/// Visitor invoked for every string leaf of a value tree.
pub trait MarkerVisitor {
    /// Inspects a string leaf.
    ///
    /// Returns `Some(value)` to replace the leaf in place.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the walk.
    fn visit(&mut self, text: &str) -> Result<Option<Value>, LinkError>;
}

/// Walks a value tree, handing every string leaf to the visitor.
///
/// # Errors
///
/// Propagates the first visitor error.
pub fn scan<V: MarkerVisitor + ?Sized>(value: &mut Value, visitor: &mut V) -> Result<(), LinkError> {
    match value {
        Value::String(text) => {
            if let Some(replacement) = visitor.visit(text)? {
                *value = replacement;
            }
        }
        Value::Array(items) => {
            for item in items {
                scan(item, visitor)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                scan(item, visitor)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Calls `f` on every string leaf without modifying the tree.
pub fn for_each_string(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(text) => f(text),
        Value::Array(items) => items.iter().for_each(|item| for_each_string(item, f)),
        Value::Object(map) => map.values().for_each(|item| for_each_string(item, f)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Scanner mode: discovers which links a unit's data refers to.
#[derive(Debug)]
pub struct DependencyScanner<'a> {
    links: &'a LinkRegistry,
    unit_key: &'a str,
    known_units: &'a HashSet<String>,
    strict: bool,
    found: Vec<(String, Link)>,
}

impl<'a> DependencyScanner<'a> {
    /// Creates a scanner for one consuming unit.
    ///
    /// A strict scanner fails on markers whose target is not in
    /// `known_units`; a lenient one logs and skips them.
    #[must_use]
    pub const fn new(
        links: &'a LinkRegistry,
        unit_key: &'a str,
        known_units: &'a HashSet<String>,
        strict: bool,
    ) -> Self {
        Self {
            links,
            unit_key,
            known_units,
            strict,
            found: Vec::new(),
        }
    }

    /// Scans a value and returns the discovered `(marker, link)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DanglingReference`] in strict mode.
    pub fn run(mut self, data: &Value) -> Result<Vec<(String, Link)>, LinkError> {
        let mut error = None;
        for_each_string(data, &mut |text| {
            if error.is_none()
                && let Err(e) = self.visit(text)
            {
                error = Some(e);
            }
        });
        match error {
            Some(e) => Err(e),
            None => Ok(self.found),
        }
    }
}

impl MarkerVisitor for DependencyScanner<'_> {
    fn visit(&mut self, text: &str) -> Result<Option<Value>, LinkError> {
        for (marker, link) in self.links.iter() {
            if !text.contains(marker.as_str()) {
                continue;
            }
            let target = link.target_key();
            if !self.known_units.contains(&target) {
                if self.strict {
                    return Err(LinkError::DanglingReference {
                        unit: self.unit_key.to_string(),
                        target,
                    });
                }
                warn!("Unit {} refers to unknown unit {target}, ignoring", self.unit_key);
                continue;
            }
            if !self.found.iter().any(|(m, _)| m == marker) {
                self.found.push((marker.clone(), link.clone()));
            }
        }
        Ok(None)
    }
}

/// Replacer mode: substitutes markers with resolved output values.
#[derive(Debug)]
pub struct OutputReplacer<'a> {
    links: &'a LinkRegistry,
    unit_key: &'a str,
}

impl<'a> OutputReplacer<'a> {
    /// Creates a replacer for one unit.
    #[must_use]
    pub const fn new(links: &'a LinkRegistry, unit_key: &'a str) -> Self {
        Self { links, unit_key }
    }
}

impl MarkerVisitor for OutputReplacer<'_> {
    fn visit(&mut self, text: &str) -> Result<Option<Value>, LinkError> {
        let mut current = text.to_string();
        let mut changed = false;

        for (marker, link) in self.links.iter() {
            if !link.is_output() || !current.contains(marker.as_str()) {
                continue;
            }
            let value = if let Some(data) = &link.output_data {
                data.clone()
            } else {
                warn!(
                    "Output {} is not available yet for unit {}, using placeholder",
                    link.placeholder(),
                    self.unit_key
                );
                Value::String(link.placeholder())
            };

            if current == *marker {
                return Ok(Some(value));
            }
            current = current.replace(marker.as_str(), &value_to_text(&value));
            changed = true;
        }

        Ok(changed.then_some(Value::String(current)))
    }
}

/// Placeholder mode: hides markers behind `<output stack.unit.output>` text.
#[derive(Debug)]
pub struct PlaceholderReplacer<'a> {
    links: &'a LinkRegistry,
}

impl<'a> PlaceholderReplacer<'a> {
    /// Creates a placeholder replacer.
    #[must_use]
    pub const fn new(links: &'a LinkRegistry) -> Self {
        Self { links }
    }
}

impl MarkerVisitor for PlaceholderReplacer<'_> {
    fn visit(&mut self, text: &str) -> Result<Option<Value>, LinkError> {
        let mut current = text.to_string();
        let mut changed = false;
        for (marker, link) in self.links.iter() {
            if current.contains(marker.as_str()) {
                current = current.replace(marker.as_str(), &link.placeholder());
                changed = true;
            }
        }
        Ok(changed.then_some(Value::String(current)))
    }
}

/// Replaces markers in a copy of `data` with resolved outputs.
///
/// # Errors
///
/// Returns an error if the walk fails.
pub fn resolve_outputs(data: &Value, links: &LinkRegistry, unit_key: &str) -> Result<Value, LinkError> {
    let mut resolved = data.clone();
    scan(&mut resolved, &mut OutputReplacer::new(links, unit_key))?;
    Ok(resolved)
}

/// Returns a copy of `data` with markers replaced by readable placeholders.
#[must_use]
pub fn with_placeholders(data: &Value, links: &LinkRegistry) -> Value {
    let mut view = data.clone();
    // The placeholder visitor never fails.
    let _ = scan(&mut view, &mut PlaceholderReplacer::new(links));
    view
}

/// Fails if any marker survived in a built artifact.
///
/// # Errors
///
/// Returns [`LinkError::UnprocessedMarker`] naming the first leftover marker.
pub fn ensure_no_markers(unit_key: &str, artifact: &Value) -> Result<(), LinkError> {
    let mut leftover = None;
    for_each_string(artifact, &mut |text| {
        if leftover.is_none() {
            leftover = find_markers(text).into_iter().next();
        }
    });
    match leftover {
        Some(marker) => Err(LinkError::UnprocessedMarker {
            unit: unit_key.to_string(),
            marker,
        }),
        None => Ok(()),
    }
}

/// Renders a value for substring interpolation.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_vpc(data: Option<Value>) -> (LinkRegistry, String) {
        let mut registry = LinkRegistry::new();
        let mut link = Link::output("infra1", "vpc", "vpc_id");
        link.output_data = data;
        let marker = registry.set(link).expect("set");
        (registry, marker)
    }

    #[test]
    fn test_exact_marker_is_replaced_by_typed_value() {
        let (registry, marker) = registry_with_vpc(Some(json!("vpc-123")));
        let resolved = resolve_outputs(&json!(marker), &registry, "infra1.app").expect("resolve");
        assert_eq!(resolved, json!("vpc-123"));

        let (registry, marker) = registry_with_vpc(Some(json!({"a": 1})));
        let resolved =
            resolve_outputs(&json!({ "cfg": marker }), &registry, "infra1.app").expect("resolve");
        assert_eq!(resolved, json!({ "cfg": { "a": 1 } }));
    }

    #[test]
    fn test_embedded_marker_is_substring_replaced() {
        let (registry, marker) = registry_with_vpc(Some(json!("vpc-123")));
        let data = json!([format!("id={marker}")]);
        let resolved = resolve_outputs(&data, &registry, "infra1.app").expect("resolve");
        assert_eq!(resolved, json!(["id=vpc-123"]));

        let (registry, marker) = registry_with_vpc(Some(json!(8080)));
        let resolved =
            resolve_outputs(&json!(format!("port={marker}")), &registry, "infra1.app").expect("resolve");
        assert_eq!(resolved, json!("port=8080"));
    }

    #[test]
    fn test_missing_output_falls_back_to_placeholder() {
        let (registry, marker) = registry_with_vpc(None);
        let resolved = resolve_outputs(&json!(marker), &registry, "infra1.app").expect("resolve");
        assert_eq!(resolved, json!("<output infra1.vpc.vpc_id>"));
    }

    #[test]
    fn test_scanner_finds_dependencies() {
        let (registry, marker) = registry_with_vpc(None);
        let known: HashSet<String> = ["infra1.vpc".to_string()].into_iter().collect();
        let data = json!({ "nested": [ { "x": format!("a {marker} b") } ], "n": 3 });
        let found = DependencyScanner::new(&registry, "infra1.app", &known, true)
            .run(&data)
            .expect("scan");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.target_key(), "infra1.vpc");
    }

    #[test]
    fn test_scanner_rejects_dangling_reference() {
        let (registry, marker) = registry_with_vpc(None);
        let known = HashSet::new();
        let err = DependencyScanner::new(&registry, "infra1.app", &known, true)
            .run(&json!(marker.clone()))
            .expect_err("dangling");
        assert!(matches!(err, LinkError::DanglingReference { .. }));

        let lenient = DependencyScanner::new(&registry, "infra1.app", &known, false)
            .run(&json!(marker))
            .expect("lenient scan");
        assert!(lenient.is_empty());
    }

    #[test]
    fn test_placeholders_and_unprocessed_markers() {
        let (registry, marker) = registry_with_vpc(Some(json!("vpc-123")));
        let data = json!({ "id": format!("x-{marker}") });

        assert_eq!(
            with_placeholders(&data, &registry),
            json!({ "id": "x-<output infra1.vpc.vpc_id>" })
        );
        assert!(ensure_no_markers("infra1.app", &data).is_err());

        let resolved = resolve_outputs(&data, &registry, "infra1.app").expect("resolve");
        assert!(ensure_no_markers("infra1.app", &resolved).is_ok());
    }
}
