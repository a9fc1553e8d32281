//! The per-run link registry.
//!
//! Maps markers to their link records. Iteration follows insertion order so
//! scans and serialized state are deterministic.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LinkError;

use super::marker::{Link, LinkType};

/// Registry of all links known to a project run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkRegistry {
    #[serde(rename = "unit_links_list", default)]
    links: IndexMap<String, Link>,
}

impl LinkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a link, overwriting any link with the same marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be computed.
    pub fn set(&mut self, link: Link) -> Result<String, LinkError> {
        let marker = link.marker()?;
        self.links.insert(marker.clone(), link);
        Ok(marker)
    }

    /// Registers a link that must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker is already registered or cannot be computed.
    pub fn insert(&mut self, link: Link) -> Result<String, LinkError> {
        let marker = link.marker()?;
        if self.links.contains_key(&marker) {
            return Err(LinkError::AlreadyExists { marker });
        }
        self.links.insert(marker.clone(), link);
        Ok(marker)
    }

    /// Gets a link by marker.
    #[must_use]
    pub fn get(&self, marker: &str) -> Option<&Link> {
        self.links.get(marker)
    }

    /// Removes a link by marker.
    pub fn delete(&mut self, marker: &str) -> Option<Link> {
        self.links.shift_remove(marker)
    }

    /// Returns true if the marker is registered.
    #[must_use]
    pub fn contains(&self, marker: &str) -> bool {
        self.links.contains_key(marker)
    }

    /// Adds every link of `other` that is not registered yet.
    pub fn join(&mut self, other: &Self) {
        for (marker, link) in &other.links {
            if !self.links.contains_key(marker) {
                self.links.insert(marker.clone(), link.clone());
            }
        }
    }

    /// Like [`join`](Self::join), but also fills in output data on existing
    /// links that have none. Existing resolved data is never overwritten.
    pub fn join_with_data_replace(&mut self, other: &Self) {
        for (marker, link) in &other.links {
            match self.links.get_mut(marker) {
                Some(existing) => {
                    if existing.output_data.is_none() && link.output_data.is_some() {
                        existing.output_data.clone_from(&link.output_data);
                    }
                }
                None => {
                    self.links.insert(marker.clone(), link.clone());
                }
            }
        }
    }

    /// Returns the links of the given types.
    #[must_use]
    pub fn by_link_types(&self, types: &[LinkType]) -> Self {
        self.filtered(|link| types.contains(&link.link_type))
    }

    /// Returns the links pointing at the given unit key.
    #[must_use]
    pub fn by_target_unit(&self, target_key: &str) -> Self {
        self.filtered(|link| link.target_key() == target_key)
    }

    fn filtered(&self, keep: impl Fn(&Link) -> bool) -> Self {
        Self {
            links: self
                .links
                .iter()
                .filter(|(_, link)| keep(link))
                .map(|(marker, link)| (marker.clone(), link.clone()))
                .collect(),
        }
    }

    /// Returns each distinct target unit key, in first-seen order.
    #[must_use]
    pub fn uniq_target_keys(&self) -> Vec<String> {
        self.links
            .values()
            .map(Link::target_key)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drops links whose target unit is rejected by `keep`.
    pub fn retain_targets(&mut self, keep: impl Fn(&str) -> bool) {
        self.links.retain(|_, link| keep(&link.target_key()));
    }

    /// Stores output values on every output link pointing at `target_key`.
    ///
    /// Returns the names of outputs that consumers expect but were not provided.
    pub fn set_output_data(
        &mut self,
        target_key: &str,
        outputs: &IndexMap<String, Value>,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for link in self.links.values_mut() {
            if !link.is_output() || link.target_key() != target_key {
                continue;
            }
            match outputs.get(&link.output_name) {
                Some(value) => link.output_data = Some(value.clone()),
                None => {
                    if !missing.contains(&link.output_name) {
                        missing.push(link.output_name.clone());
                    }
                }
            }
        }
        missing
    }

    /// Collects the resolved outputs of a unit by output name.
    #[must_use]
    pub fn outputs_of(&self, target_key: &str) -> IndexMap<String, Value> {
        self.links
            .values()
            .filter(|link| link.is_output() && link.target_key() == target_key)
            .filter_map(|link| {
                link.output_data
                    .as_ref()
                    .map(|data| (link.output_name.clone(), data.clone()))
            })
            .collect()
    }

    /// Iterates over `(marker, link)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Link)> {
        self.links.iter()
    }

    /// Returns the number of links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns true if the registry holds no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_is_idempotent() {
        let mut registry = LinkRegistry::new();
        let a = registry.set(Link::output("infra", "vpc", "id")).expect("set");
        let b = registry.set(Link::output("infra", "vpc", "id")).expect("set");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut registry = LinkRegistry::new();
        registry.insert(Link::output("infra", "vpc", "id")).expect("insert");
        assert!(registry.insert(Link::output("infra", "vpc", "id")).is_err());
    }

    #[test]
    fn test_join_with_data_replace_keeps_resolved_data() {
        let mut resolved = LinkRegistry::new();
        let mut link = Link::output("infra", "vpc", "id");
        link.output_data = Some(json!("vpc-123"));
        let marker = resolved.set(link).expect("set");

        let mut unresolved = LinkRegistry::new();
        unresolved.set(Link::output("infra", "vpc", "id")).expect("set");

        resolved.join_with_data_replace(&unresolved);
        assert_eq!(
            resolved.get(&marker).and_then(|l| l.output_data.clone()),
            Some(json!("vpc-123"))
        );

        unresolved.join_with_data_replace(&resolved);
        assert_eq!(
            unresolved.get(&marker).and_then(|l| l.output_data.clone()),
            Some(json!("vpc-123"))
        );
    }

    #[test]
    fn test_filters() {
        let mut registry = LinkRegistry::new();
        registry.set(Link::output("infra", "vpc", "id")).expect("set");
        registry.set(Link::remote_state("infra", "db", "host")).expect("set");
        registry.set(Link::depends_on("infra", "vpc")).expect("set");

        assert_eq!(registry.by_link_types(&[LinkType::Output]).len(), 1);
        assert_eq!(registry.by_target_unit("infra.vpc").len(), 2);
        assert_eq!(registry.uniq_target_keys(), vec!["infra.vpc", "infra.db"]);

        registry.retain_targets(|key| key != "infra.db");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_set_output_data_reports_missing() {
        let mut registry = LinkRegistry::new();
        registry.set(Link::output("infra", "vpc", "id")).expect("set");
        registry.set(Link::output("infra", "vpc", "cidr")).expect("set");

        let mut outputs = IndexMap::new();
        outputs.insert(String::from("id"), json!("vpc-1"));

        let missing = registry.set_output_data("infra.vpc", &outputs);
        assert_eq!(missing, vec![String::from("cidr")]);
        assert_eq!(registry.outputs_of("infra.vpc").get("id"), Some(&json!("vpc-1")));
    }
}
