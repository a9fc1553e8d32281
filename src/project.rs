//! Project graph assembly.
//!
//! A [`Project`] is the set of units of one run together with the link
//! registry their data refers to. It is built either from the live
//! configuration (references expanded, unknown targets rejected) or from a
//! state snapshot (units restored from their records, unknown targets
//! skipped). Units refer to each other only by key.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{ProjectConfig, ReferenceExpander};
use crate::error::{ConfigError, LinkError, PlanError, Result};
use crate::graph::{check_dependencies, DependencyMap};
use crate::links::{DependencyScanner, Link, LinkRegistry};
use crate::state::StateSnapshot;
use crate::unit::{Unit, UnitDefinition, UnitRegistry};

/// A unit and its discovered edges.
#[derive(Debug, Clone)]
pub struct UnitNode {
    /// The unit itself.
    pub unit: Arc<dyn Unit>,
    /// Links this unit consumes, ordering-only links included.
    pub dependencies: Vec<Link>,
    /// Output names other units expect this unit to publish.
    pub expected_outputs: IndexSet<String>,
    /// Keys declared through `depends_on`.
    pub depends_on: Vec<String>,
}

impl UnitNode {
    /// Distinct keys of the units this one depends on.
    #[must_use]
    pub fn dependency_keys(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(Link::target_key)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Units of one run and the links between them.
#[derive(Debug, Clone, Default)]
pub struct Project {
    name: String,
    nodes: IndexMap<String, UnitNode>,
    links: LinkRegistry,
}

impl Project {
    /// Builds the live project from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate keys, malformed references, unknown
    /// unit kinds, or markers pointing at units that do not exist.
    pub fn from_config(config: &ProjectConfig, registry: &UnitRegistry) -> Result<Self> {
        let mut links = LinkRegistry::new();
        let mut units = Vec::with_capacity(config.unit_count());
        let mut seen = HashSet::new();

        for (stack, unit_config) in config.units() {
            let key = unit_config.key(&stack.name);
            if !seen.insert(key.clone()) {
                return Err(ConfigError::DuplicateName {
                    resource_type: String::from("unit"),
                    name: key,
                }
                .into());
            }

            let mut data = Value::Object(unit_config.data.clone());
            let mut expander = ReferenceExpander::new(&mut links, &stack.name, &key);
            let explicit = unit_config
                .depends_on
                .iter()
                .map(|entry| expander.depends_on(entry))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            expander.expand(&mut data)?;

            let unit = registry.create(UnitDefinition {
                stack: stack.name.clone(),
                name: unit_config.name.clone(),
                kind: unit_config.kind.clone(),
                force_apply: unit_config.force_apply,
                tainted: false,
                data,
            })?;
            units.push((unit, explicit));
        }

        Self::assemble(&config.project.name, units, links, true)
    }

    /// Rebuilds the project recorded in a state snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a record has an unknown kind or invalid data.
    pub fn from_snapshot(snapshot: &StateSnapshot, registry: &UnitRegistry) -> Result<Self> {
        let mut units = Vec::with_capacity(snapshot.units.len());
        for (key, record) in &snapshot.units {
            let unit = registry.restore(key, record)?;
            let explicit = record
                .depends_on
                .iter()
                .filter_map(|dep| dep.split_once('.'))
                .map(|(stack, unit)| Link::depends_on(stack, unit))
                .collect();
            units.push((unit, explicit));
        }

        Self::assemble(&snapshot.project, units, snapshot.unit_links.clone(), false)
    }

    fn assemble(
        name: &str,
        units: Vec<(Arc<dyn Unit>, Vec<Link>)>,
        mut links: LinkRegistry,
        strict: bool,
    ) -> Result<Self> {
        let known: HashSet<String> = units.iter().map(|(unit, _)| unit.key()).collect();
        let mut nodes = IndexMap::with_capacity(units.len());

        for (unit, explicit) in units {
            let key = unit.key();
            let found = DependencyScanner::new(&links, &key, &known, strict).run(unit.spec_data())?;
            let mut dependencies: Vec<Link> = found.into_iter().map(|(_, link)| link).collect();
            let mut depends_on = Vec::new();

            for link in explicit {
                let target = link.target_key();
                if !known.contains(&target) {
                    if strict {
                        return Err(LinkError::DanglingReference { unit: key, target }.into());
                    }
                    warn!("Unit {key} depends on unknown unit {target}, ignoring");
                    continue;
                }
                links.set(link.clone())?;
                if !depends_on.contains(&target) {
                    depends_on.push(target);
                    dependencies.push(link);
                }
            }

            nodes.insert(
                key,
                UnitNode {
                    unit,
                    dependencies,
                    expected_outputs: IndexSet::new(),
                    depends_on,
                },
            );
        }

        let expectations: Vec<(String, String)> = nodes
            .values()
            .flat_map(|node| node.dependencies.iter())
            .filter(|link| link.is_output())
            .map(|link| (link.target_key(), link.output_name.clone()))
            .collect();
        for (target, output) in expectations {
            if let Some(node) = nodes.get_mut(&target) {
                node.expected_outputs.insert(output);
            }
        }

        debug!("Assembled project {name} with {} unit(s)", nodes.len());
        Ok(Self {
            name: name.to_string(),
            nodes,
            links,
        })
    }

    /// Project name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets a node by unit key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&UnitNode> {
        self.nodes.get(key)
    }

    /// Returns true if the unit exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Unit keys in configuration order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Iterates over `(key, node)` pairs in configuration order.
    pub fn nodes(&self) -> impl Iterator<Item = (&String, &UnitNode)> {
        self.nodes.iter()
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the project has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The link registry of this project.
    #[must_use]
    pub const fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// Consumes the project and returns its link registry.
    #[must_use]
    pub fn into_links(self) -> LinkRegistry {
        self.links
    }

    /// Adjacency map over unit keys.
    #[must_use]
    pub fn dependency_map(&self) -> DependencyMap {
        self.nodes
            .iter()
            .map(|(key, node)| (key.clone(), node.dependency_keys()))
            .collect()
    }

    /// Rejects cycles and unknown dependencies.
    ///
    /// # Errors
    ///
    /// Returns the cycle chain wrapped with the unit the walk started from.
    pub fn check_dependencies(&self) -> Result<()> {
        check_dependencies(&self.dependency_map())?;
        Ok(())
    }

    /// Keys of the units that depend on `key`.
    #[must_use]
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.dependencies.iter().any(|l| l.target_key() == key))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Selects units by `stack` or `stack.unit` expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFilter {
    targets: Vec<String>,
    excludes: Vec<String>,
}

impl TargetFilter {
    /// Creates a filter. An empty target list selects every unit.
    #[must_use]
    pub const fn new(targets: Vec<String>, excludes: Vec<String>) -> Self {
        Self { targets, excludes }
    }

    /// Returns true if the filter selects everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.excludes.is_empty()
    }

    /// Returns true if the unit key is selected.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let included =
            self.targets.is_empty() || self.targets.iter().any(|t| Self::covers(t, key));
        included && !self.excludes.iter().any(|e| Self::covers(e, key))
    }

    /// Checks that every expression names at least one of `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownTarget`] for the first unmatched expression.
    pub fn check<'a>(&self, keys: impl IntoIterator<Item = &'a String> + Clone) -> Result<()> {
        for expr in self.targets.iter().chain(&self.excludes) {
            if !keys.clone().into_iter().any(|k| Self::covers(expr, k)) {
                return Err(PlanError::UnknownTarget {
                    target: expr.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn covers(expr: &str, key: &str) -> bool {
        key == expr
            || key
                .strip_prefix(expr)
                .is_some_and(|rest| rest.starts_with('.') && !expr.contains('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::StackforgeError;
    use crate::unit::testing::{recording_registry, Journal};
    use crate::unit::StateRecord;
    use serde_json::json;

    fn parse(yaml: &str) -> ProjectConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    fn registry() -> UnitRegistry {
        recording_registry(&Arc::new(Journal::default()))
    }

    const CHAIN: &str = r#"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: net
        type: recording
        outputs: { subnet_id: subnet-1 }
      - name: db
        type: recording
        subnet: '{{ output "this.net.subnet_id" }}'
  - name: app
    units:
      - name: web
        type: recording
        depends_on: [ "infra.db" ]
        url: 'http://{{ output "infra.db.host" }}'
"#;

    #[test]
    fn test_from_config_discovers_edges() {
        let project = Project::from_config(&parse(CHAIN), &registry()).expect("project");

        assert_eq!(project.len(), 3);
        let deps = project.dependency_map();
        assert_eq!(deps["infra.net"], Vec::<String>::new());
        assert_eq!(deps["infra.db"], vec![String::from("infra.net")]);
        assert_eq!(deps["app.web"], vec![String::from("infra.db")]);

        let net = project.get("infra.net").expect("net");
        assert!(net.expected_outputs.contains("subnet_id"));
        let web = project.get("app.web").expect("web");
        assert_eq!(web.depends_on, vec![String::from("infra.db")]);
        assert_eq!(project.dependents_of("infra.net"), vec![String::from("infra.db")]);
        project.check_dependencies().expect("acyclic");
    }

    #[test]
    fn test_dangling_reference_is_rejected() {
        let yaml = r#"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: db
        type: recording
        subnet: '{{ output "infra.missing.id" }}'
"#;
        let err = Project::from_config(&parse(yaml), &registry()).expect_err("dangling");
        assert!(matches!(
            err,
            StackforgeError::Link(LinkError::DanglingReference { ref target, .. }) if target == "infra.missing"
        ));
    }

    #[test]
    fn test_unknown_depends_on_is_rejected() {
        let yaml = r#"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: db
        type: recording
        depends_on: [ "infra.ghost" ]
"#;
        assert!(Project::from_config(&parse(yaml), &registry()).is_err());
    }

    #[test]
    fn test_cycle_is_reported() {
        let yaml = r#"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: a
        type: recording
        depends_on: [ "this.b" ]
      - name: b
        type: recording
        depends_on: [ "this.a" ]
"#;
        let project = Project::from_config(&parse(yaml), &registry()).expect("project");
        let err = project.check_dependencies().expect_err("cycle");
        assert!(matches!(
            err,
            StackforgeError::Config(ConfigError::UnresolvedDependency { .. })
        ));
        assert!(err.to_string().contains("s.a -> s.b -> s.a"));
    }

    #[test]
    fn test_from_snapshot_keeps_depends_on_edges() {
        let mut snapshot = StateSnapshot::new("demo");
        let record = |depends_on: Vec<String>, data: Value| StateRecord {
            kind: String::from("recording"),
            tainted: false,
            force_apply: false,
            data,
            depends_on,
            outputs: IndexMap::new(),
        };
        let marker = snapshot
            .unit_links
            .set(Link::output("infra", "net", "id"))
            .expect("set");
        snapshot.update_unit("infra.net", record(Vec::new(), json!({})));
        snapshot.update_unit("infra.db", record(Vec::new(), json!({ "net": marker })));
        snapshot.update_unit(
            "app.web",
            record(vec![String::from("infra.db"), String::from("gone.unit")], json!({})),
        );

        let project = Project::from_snapshot(&snapshot, &registry()).expect("project");
        let deps = project.dependency_map();
        assert_eq!(deps["infra.db"], vec![String::from("infra.net")]);
        assert_eq!(deps["app.web"], vec![String::from("infra.db")]);
    }

    #[test]
    fn test_target_filter() {
        let filter = TargetFilter::new(vec![String::from("infra")], vec![String::from("infra.db")]);
        assert!(filter.matches("infra.net"));
        assert!(!filter.matches("infra.db"));
        assert!(!filter.matches("app.web"));
        assert!(!filter.matches("infrastructure.x"));

        let keys = vec![String::from("infra.net"), String::from("infra.db")];
        filter.check(&keys).expect("known targets");
        let unknown = TargetFilter::new(vec![String::from("app")], Vec::new());
        assert!(unknown.check(&keys).is_err());
        assert!(TargetFilter::default().matches("anything.at_all"));
    }
}
