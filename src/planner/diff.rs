//! Change detection between the live project and the state snapshot.
//!
//! Units are compared through their diff views: unit data with markers
//! hidden behind `<output stack.unit.output>` placeholders, so comparisons
//! never depend on provisioner output values.

use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::ConfigHasher;
use crate::project::Project;
use crate::state::StateSnapshot;

use super::plan::{ProjectPlan, UnitOperation, UnitPlan};

/// Reason shown for a tainted unit without configuration changes.
pub const TAINTED_REASON: &str = "Unit is tainted!";

/// Reason shown for a unit re-applied because a dependency changed.
pub const DEPENDENCY_REASON: &str = "+/- There are changes in the unit dependencies.";

/// Reason shown for a unit re-applied through its `force_apply` flag.
pub const FORCE_APPLY_REASON: &str = "+/- Will be applied as a 'force_apply' dependency";

/// How a unit's own configuration compares to the snapshot.
#[derive(Debug)]
enum DirectChange {
    /// Not in the snapshot.
    Missing { view: Value },
    /// Diff views differ.
    Changed { old: Value, new: Value, tainted: bool },
    /// Same view, but the last apply failed.
    Tainted { view: Value },
    /// Same view.
    Same,
}

/// Classifies every unit of a run.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    live: &'a Project,
    previous: &'a Project,
    snapshot: &'a StateSnapshot,
    ignore_state: bool,
    hasher: ConfigHasher,
}

impl<'a> DiffEngine<'a> {
    /// Creates an engine comparing `live` against the project restored
    /// from `snapshot`.
    #[must_use]
    pub const fn new(live: &'a Project, previous: &'a Project, snapshot: &'a StateSnapshot) -> Self {
        Self {
            live,
            previous,
            snapshot,
            ignore_state: false,
            hasher: ConfigHasher::new(),
        }
    }

    /// Treats every live unit as new and plans no destroys.
    #[must_use]
    pub const fn ignore_state(mut self, ignore: bool) -> Self {
        self.ignore_state = ignore;
        self
    }

    /// Builds the plan.
    #[must_use]
    pub fn plan(&self, config_hash: &str) -> ProjectPlan {
        let mut units = Vec::new();

        if self.ignore_state {
            for (key, node) in self.live.nodes() {
                let view = node.unit.get_diff_data(self.live.links());
                units.push(
                    UnitPlan::new(key.as_str(), UnitOperation::Apply)
                        .with_diff(render_diff(&Value::Null, &view))
                        .with_fingerprint(self.fingerprint(&view)),
                );
            }
            return ProjectPlan::new(self.live.name(), config_hash, units);
        }

        for (key, node) in self.previous.nodes() {
            if self.live.contains(key) {
                continue;
            }
            let view = node.unit.get_diff_data(self.previous.links());
            debug!("Unit {key} is no longer configured");
            units.push(
                UnitPlan::new(key.as_str(), UnitOperation::Destroy)
                    .with_diff(render_diff(&view, &Value::Null)),
            );
        }

        let mut cache = HashMap::new();
        for key in self.live.keys() {
            units.push(self.classify(key, &mut cache));
        }

        self.propagate_force_apply(&mut units);
        ProjectPlan::new(self.live.name(), config_hash, units)
    }

    fn classify(&self, key: &str, cache: &mut HashMap<String, bool>) -> UnitPlan {
        let fingerprint = self
            .live
            .get(key)
            .map(|node| self.fingerprint(&node.unit.get_diff_data(self.live.links())))
            .unwrap_or_default();

        let plan = match self.direct_change(key) {
            DirectChange::Missing { view } => {
                UnitPlan::new(key, UnitOperation::Apply).with_diff(render_diff(&Value::Null, &view))
            }
            DirectChange::Changed { old, new, tainted } => UnitPlan::new(key, UnitOperation::Update)
                .with_diff(render_diff(&old, &new))
                .with_tainted(tainted),
            DirectChange::Tainted { view } => UnitPlan::new(key, UnitOperation::Update)
                .with_tainted(true)
                .with_reason(TAINTED_REASON)
                .with_diff(render_diff(&Value::Null, &view)),
            DirectChange::Same => {
                let deps = self.live.get(key).map(|n| n.dependency_keys()).unwrap_or_default();
                if deps.iter().any(|dep| self.is_changed(dep, cache)) {
                    if self.live.get(key).is_some_and(|n| n.unit.force_apply()) {
                        UnitPlan::new(key, UnitOperation::UpdateAsDep).with_reason(FORCE_APPLY_REASON)
                    } else {
                        UnitPlan::new(key, UnitOperation::Update).with_reason(DEPENDENCY_REASON)
                    }
                } else {
                    UnitPlan::new(key, UnitOperation::NotChanged)
                }
            }
        };
        plan.with_fingerprint(fingerprint)
    }

    fn direct_change(&self, key: &str) -> DirectChange {
        let Some(node) = self.live.get(key) else {
            return DirectChange::Same;
        };
        let new = node.unit.get_diff_data(self.live.links());
        let (Some(previous), Some(record)) = (self.previous.get(key), self.snapshot.units.get(key))
        else {
            return DirectChange::Missing { view: new };
        };

        let old = previous.unit.get_diff_data(self.previous.links());
        if old != new {
            return DirectChange::Changed {
                old,
                new,
                tainted: record.tainted,
            };
        }
        if record.tainted {
            return DirectChange::Tainted { view: new };
        }
        DirectChange::Same
    }

    /// A unit is changed if it was written in this run, differs from the
    /// snapshot, is tainted, or any of its dependencies is changed.
    fn is_changed(&self, key: &str, cache: &mut HashMap<String, bool>) -> bool {
        if let Some(changed) = cache.get(key) {
            return *changed;
        }
        cache.insert(key.to_string(), false);

        let changed = self.snapshot.was_changed(key)
            || !matches!(self.direct_change(key), DirectChange::Same)
            || self.live.get(key).is_some_and(|node| {
                node.dependency_keys()
                    .iter()
                    .any(|dep| self.is_changed(dep, cache))
            });

        cache.insert(key.to_string(), changed);
        changed
    }

    /// Unchanged `force_apply` units that a changed unit depends on,
    /// directly or not, are re-applied too, and so are the units that
    /// depend on them.
    fn propagate_force_apply(&self, units: &mut [UnitPlan]) {
        let forced = |key: &str| self.live.get(key).is_some_and(|n| n.unit.force_apply());
        let mut pending: Vec<String> = units
            .iter()
            .filter(|u| u.operation.is_apply())
            .map(|u| u.key.clone())
            .collect();

        while let Some(key) = pending.pop() {
            for dep in self.transitive_dependencies(&key) {
                if forced(dep.as_str()) && promote(units, &dep, UnitOperation::UpdateAsDep, FORCE_APPLY_REASON) {
                    debug!("Unit {dep} added for update as a force_apply dependency");
                    pending.push(dep);
                }
            }
            for dependent in self.live.dependents_of(&key) {
                let (operation, reason) = if forced(dependent.as_str()) {
                    (UnitOperation::UpdateAsDep, FORCE_APPLY_REASON)
                } else {
                    (UnitOperation::Update, DEPENDENCY_REASON)
                };
                if promote(units, &dependent, operation, reason) {
                    debug!("Unit {dependent} added for update after {key}");
                    pending.push(dependent);
                }
            }
        }
    }

    fn transitive_dependencies(&self, key: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![key.to_string()];
        let mut result = Vec::new();
        while let Some(current) = stack.pop() {
            let Some(node) = self.live.get(&current) else {
                continue;
            };
            for dep in node.dependency_keys() {
                if seen.insert(dep.clone()) {
                    result.push(dep.clone());
                    stack.push(dep);
                }
            }
        }
        result
    }

    fn fingerprint(&self, view: &Value) -> String {
        self.hasher.short_hash(&self.hasher.hash_value(view))
    }
}

/// Renders a line diff between two diff views as YAML.
///
/// Removed lines start with `- `, added lines with `+ `, unchanged lines
/// with two spaces. `Null` renders as nothing, so a one-sided diff lists
/// the whole other side.
#[must_use]
pub fn render_diff(old: &Value, new: &Value) -> String {
    let old_text = to_text(old);
    let new_text = to_text(new);
    let diff = TextDiff::from_lines(&old_text, &new_text);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => "  ",
        };
        out.push_str(sign);
        out.push_str(change.value().trim_end_matches('\n'));
        out.push('\n');
    }
    out
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Moves an unchanged unit to `operation`. Returns false if the unit is
/// already planned for something else.
fn promote(units: &mut [UnitPlan], key: &str, operation: UnitOperation, reason: &str) -> bool {
    match units
        .iter_mut()
        .find(|u| u.key == key && u.operation == UnitOperation::NotChanged)
    {
        Some(unit) => {
            unit.operation = operation;
            unit.reason = Some(reason.to_string());
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ProjectConfig};
    use crate::unit::testing::{recording_registry, Journal};
    use crate::unit::UnitRegistry;
    use std::sync::Arc;

    fn registry() -> UnitRegistry {
        recording_registry(&Arc::new(Journal::default()))
    }

    fn config(yaml: &str) -> ProjectConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    fn live(yaml: &str) -> Project {
        Project::from_config(&config(yaml), &registry()).expect("project")
    }

    /// Snapshot as a successful apply of `project` would leave it.
    fn snapshot_of(project: &Project) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new(project.name());
        snapshot.unit_links = project.links().clone();
        for (key, node) in project.nodes() {
            let mut record = node.unit.get_state();
            record.depends_on = node.depends_on.clone();
            snapshot.units.insert(key.clone(), record);
        }
        snapshot
    }

    fn plan(live: &Project, snapshot: &StateSnapshot) -> ProjectPlan {
        let previous = Project::from_snapshot(snapshot, &registry()).expect("previous");
        DiffEngine::new(live, &previous, snapshot).plan("hash")
    }

    fn ops(plan: &ProjectPlan) -> Vec<(String, UnitOperation)> {
        plan.units.iter().map(|u| (u.key.clone(), u.operation)).collect()
    }

    const BASE: &str = r#"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: net
        type: recording
        cidr: 10.0.0.0/16
        outputs: { subnet_id: subnet-1 }
      - name: db
        type: recording
        subnet: '{{ output "this.net.subnet_id" }}'
"#;

    #[test]
    fn test_empty_state_applies_everything() {
        let project = live(BASE);
        let plan = plan(&project, &StateSnapshot::new("demo"));

        assert_eq!(
            ops(&plan),
            vec![
                (String::from("infra.net"), UnitOperation::Apply),
                (String::from("infra.db"), UnitOperation::Apply),
            ]
        );
        assert!(plan.has_changes());
        let db = plan.get("infra.db").expect("db");
        assert!(db.diff.lines().all(|l| l.starts_with("+ ")));
        assert!(db.diff.contains("<output infra.net.subnet_id>"));
        assert_eq!(db.fingerprint.len(), 8);
    }

    #[test]
    fn test_second_plan_is_idempotent() {
        let project = live(BASE);
        let snapshot = snapshot_of(&project);

        let first = plan(&project, &snapshot);
        let second = plan(&project, &snapshot);
        assert!(!first.has_changes());
        assert!(!second.has_changes());
        assert_eq!(first.count(UnitOperation::NotChanged), 2);
    }

    #[test]
    fn test_removed_unit_is_destroyed() {
        let snapshot = snapshot_of(&live(BASE));
        let only_net = live(
            r"
project:
  name: demo
stacks:
  - name: infra
    units:
      - name: net
        type: recording
        cidr: 10.0.0.0/16
        outputs: { subnet_id: subnet-1 }
",
        );

        let plan = plan(&only_net, &snapshot);
        assert_eq!(plan.operation_of("infra.net"), Some(UnitOperation::NotChanged));
        assert_eq!(plan.operation_of("infra.db"), Some(UnitOperation::Destroy));
        assert_eq!(plan.units[0].key, "infra.db");
        let destroy = plan.get("infra.db").expect("db");
        assert!(destroy.diff.lines().all(|l| l.starts_with("- ")));
    }

    #[test]
    fn test_changes_propagate_to_dependents() {
        let snapshot = snapshot_of(&live(BASE));
        let changed = live(&BASE.replace("10.0.0.0/16", "10.1.0.0/16"));

        let plan = plan(&changed, &snapshot);
        let net = plan.get("infra.net").expect("net");
        assert_eq!(net.operation, UnitOperation::Update);
        assert!(net.diff.contains("- cidr: 10.0.0.0/16"));
        assert!(net.diff.contains("+ cidr: 10.1.0.0/16"));

        let db = plan.get("infra.db").expect("db");
        assert_eq!(db.operation, UnitOperation::Update);
        assert_eq!(db.reason.as_deref(), Some(DEPENDENCY_REASON));
    }

    #[test]
    fn test_force_apply_dependent_is_update_as_dep() {
        let yaml = r"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: a
        type: recording
        value: VALUE
      - name: c
        type: recording
        force_apply: true
        depends_on: [ this.a ]
";
        let snapshot = snapshot_of(&live(&yaml.replace("VALUE", "1")));
        let plan = plan(&live(&yaml.replace("VALUE", "2")), &snapshot);

        assert_eq!(plan.operation_of("s.a"), Some(UnitOperation::Update));
        let c = plan.get("s.c").expect("c");
        assert_eq!(c.operation, UnitOperation::UpdateAsDep);
        assert_eq!(c.reason.as_deref(), Some(FORCE_APPLY_REASON));
    }

    #[test]
    fn test_force_apply_dependency_of_changed_unit() {
        let yaml = r#"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: p
        type: recording
        force_apply: true
        outputs: { id: p-1 }
      - name: q
        type: recording
        value: VALUE
        input: '{{ output "this.p.id" }}'
"#;
        let snapshot = snapshot_of(&live(&yaml.replace("VALUE", "1")));
        let plan = plan(&live(&yaml.replace("VALUE", "2")), &snapshot);

        assert_eq!(plan.operation_of("s.q"), Some(UnitOperation::Update));
        assert_eq!(plan.operation_of("s.p"), Some(UnitOperation::UpdateAsDep));
    }

    #[test]
    fn test_force_apply_dependency_reaches_its_other_dependents() {
        let yaml = r#"
project:
  name: demo
stacks:
  - name: s
    units:
      - name: p
        type: recording
        force_apply: true
        outputs: { id: p-1 }
      - name: q
        type: recording
        value: VALUE
        input: '{{ output "this.p.id" }}'
      - name: r
        type: recording
        input: '{{ output "this.p.id" }}'
      - name: t
        type: recording
        depends_on: [ this.r ]
"#;
        let snapshot = snapshot_of(&live(&yaml.replace("VALUE", "1")));
        let plan = plan(&live(&yaml.replace("VALUE", "2")), &snapshot);

        assert_eq!(plan.operation_of("s.p"), Some(UnitOperation::UpdateAsDep));
        let r = plan.get("s.r").expect("r");
        assert_eq!(r.operation, UnitOperation::Update);
        assert_eq!(r.reason.as_deref(), Some(DEPENDENCY_REASON));
        assert_eq!(plan.operation_of("s.t"), Some(UnitOperation::Update));
    }

    #[test]
    fn test_tainted_unit_is_updated() {
        let project = live(BASE);
        let mut snapshot = snapshot_of(&project);
        if let Some(record) = snapshot.units.get_mut("infra.net") {
            record.tainted = true;
        }

        let plan = plan(&project, &snapshot);
        let net = plan.get("infra.net").expect("net");
        assert_eq!(net.operation, UnitOperation::Update);
        assert!(net.tainted);
        assert_eq!(net.reason.as_deref(), Some(TAINTED_REASON));
        assert_eq!(net.display_key(), "infra.net(tainted)");
        assert_eq!(plan.operation_of("infra.db"), Some(UnitOperation::Update));
    }

    #[test]
    fn test_unit_written_in_this_run_counts_as_changed() {
        let project = live(BASE);
        let mut snapshot = snapshot_of(&project);
        snapshot.changed_units.insert(String::from("infra.net"));

        let plan = plan(&project, &snapshot);
        assert_eq!(plan.operation_of("infra.net"), Some(UnitOperation::NotChanged));
        assert_eq!(plan.operation_of("infra.db"), Some(UnitOperation::Update));
    }

    #[test]
    fn test_ignore_state() {
        let project = live(BASE);
        let snapshot = snapshot_of(&project);
        let previous = Project::from_snapshot(&snapshot, &registry()).expect("previous");

        let plan = DiffEngine::new(&project, &previous, &snapshot)
            .ignore_state(true)
            .plan("hash");
        assert_eq!(plan.count(UnitOperation::Apply), 2);
    }

    #[test]
    fn test_render_diff() {
        let old = serde_json::json!({ "a": 1, "b": "x" });
        let new = serde_json::json!({ "a": 1, "b": "y" });
        let diff = render_diff(&old, &new);
        assert!(diff.contains("  a: 1"));
        assert!(diff.contains("- b: x"));
        assert!(diff.contains("+ b: y"));
        assert!(render_diff(&old, &old).lines().all(|l| l.starts_with("  ")));
    }
}
