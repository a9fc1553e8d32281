//! Plan types.
//!
//! A [`ProjectPlan`] is the result of one planning pass: every unit of the
//! live configuration and every unit left over in the snapshot, each with
//! the operation the next apply would perform on it.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the next apply does with a unit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitOperation {
    /// Not in the snapshot yet.
    Apply,
    /// Changed since the last apply.
    Update,
    /// Re-applied because of its `force_apply` flag.
    UpdateAsDep,
    /// In the snapshot but no longer configured.
    Destroy,
    /// Nothing to do.
    NotChanged,
}

impl UnitOperation {
    /// Returns true for every operation except [`NotChanged`](Self::NotChanged).
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::NotChanged)
    }

    /// Returns true if the unit goes through the apply phase.
    #[must_use]
    pub const fn is_apply(self) -> bool {
        matches!(self, Self::Apply | Self::Update | Self::UpdateAsDep)
    }

    /// Sort rank: destroys first, then applies, then unchanged units.
    const fn rank(self) -> u8 {
        match self {
            Self::Destroy => 0,
            Self::Apply | Self::Update | Self::UpdateAsDep => 1,
            Self::NotChanged => 2,
        }
    }
}

impl std::fmt::Display for UnitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Apply => "apply",
            Self::Update => "update",
            Self::UpdateAsDep => "update as dependency",
            Self::Destroy => "destroy",
            Self::NotChanged => "not changed",
        };
        write!(f, "{s}")
    }
}

/// Planning result for one unit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitPlan {
    /// Unit key.
    pub key: String,
    /// Planned operation.
    pub operation: UnitOperation,
    /// The previous apply of this unit did not complete.
    pub tainted: bool,
    /// Why the unit is changed when the diff alone does not say.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Line diff of the diff view, `+`/`-` prefixed.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub diff: String,
    /// Short hash of the current diff view (empty for destroyed units).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

impl UnitPlan {
    /// Creates a plan entry without reason, diff or fingerprint.
    #[must_use]
    pub fn new(key: impl Into<String>, operation: UnitOperation) -> Self {
        Self {
            key: key.into(),
            operation,
            tainted: false,
            reason: None,
            diff: String::new(),
            fingerprint: String::new(),
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the diff text.
    #[must_use]
    pub fn with_diff(mut self, diff: String) -> Self {
        self.diff = diff;
        self
    }

    /// Sets the tainted flag.
    #[must_use]
    pub const fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    /// Sets the fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Key as shown in plan tables.
    #[must_use]
    pub fn display_key(&self) -> String {
        if self.tainted {
            format!("{}(tainted)", self.key)
        } else {
            self.key.clone()
        }
    }
}

/// A complete planning result.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Project name.
    pub project: String,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Units ordered destroys first, then applies, then unchanged units.
    pub units: Vec<UnitPlan>,
}

impl ProjectPlan {
    /// Creates a plan; units keep their relative order within each rank.
    #[must_use]
    pub fn new(project: &str, config_hash: &str, mut units: Vec<UnitPlan>) -> Self {
        units.sort_by_key(|u| u.operation.rank());
        Self {
            created_at: Utc::now(),
            project: project.to_string(),
            config_hash: config_hash.to_string(),
            units,
        }
    }

    /// Returns true if at least one unit is changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.units.iter().any(|u| u.operation.is_change())
    }

    /// Number of units planned for `operation`.
    #[must_use]
    pub fn count(&self, operation: UnitOperation) -> usize {
        self.units.iter().filter(|u| u.operation == operation).count()
    }

    /// Gets the plan of one unit.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&UnitPlan> {
        self.units.iter().find(|u| u.key == key)
    }

    /// Operation planned for a unit.
    #[must_use]
    pub fn operation_of(&self, key: &str) -> Option<UnitOperation> {
        self.get(key).map(|u| u.operation)
    }

    /// Keys going through the apply phase.
    #[must_use]
    pub fn apply_keys(&self) -> Vec<String> {
        self.keys_where(UnitOperation::is_apply)
    }

    /// Keys going through the destroy phase.
    #[must_use]
    pub fn destroy_keys(&self) -> Vec<String> {
        self.keys_where(|op| op == UnitOperation::Destroy)
    }

    /// Keys left untouched.
    #[must_use]
    pub fn unchanged_keys(&self) -> Vec<String> {
        self.keys_where(|op| op == UnitOperation::NotChanged)
    }

    fn keys_where(&self, keep: impl Fn(UnitOperation) -> bool) -> Vec<String> {
        self.units
            .iter()
            .filter(|u| keep(u.operation))
            .map(|u| u.key.clone())
            .collect()
    }

    /// Drops units the predicate rejects.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.units.retain(|u| keep(&u.key));
    }
}

impl std::fmt::Display for ProjectPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to deploy, {} to update, {} to destroy, {} unchanged",
            self.count(UnitOperation::Apply),
            self.count(UnitOperation::Update) + self.count(UnitOperation::UpdateAsDep),
            self.count(UnitOperation::Destroy),
            self.count(UnitOperation::NotChanged)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_are_ordered_by_rank() {
        let plan = ProjectPlan::new(
            "demo",
            "hash",
            vec![
                UnitPlan::new("s.keep", UnitOperation::NotChanged),
                UnitPlan::new("s.new", UnitOperation::Apply),
                UnitPlan::new("s.old", UnitOperation::Destroy),
                UnitPlan::new("s.dep", UnitOperation::UpdateAsDep),
            ],
        );

        let keys: Vec<&str> = plan.units.iter().map(|u| u.key.as_str()).collect();
        assert_eq!(keys, vec!["s.old", "s.new", "s.dep", "s.keep"]);
        assert_eq!(plan.apply_keys(), vec!["s.new", "s.dep"]);
        assert_eq!(plan.destroy_keys(), vec!["s.old"]);
        assert!(plan.has_changes());
        assert_eq!(
            plan.to_string(),
            "Plan: 1 to deploy, 1 to update, 1 to destroy, 1 unchanged"
        );
    }

    #[test]
    fn test_no_changes() {
        let plan = ProjectPlan::new("demo", "hash", vec![UnitPlan::new("s.a", UnitOperation::NotChanged)]);
        assert!(!plan.has_changes());
        assert!(!ProjectPlan::new("demo", "hash", Vec::new()).has_changes());
    }

    #[test]
    fn test_display_key_marks_tainted() {
        let unit = UnitPlan::new("s.a", UnitOperation::Update).with_tainted(true);
        assert_eq!(unit.display_key(), "s.a(tainted)");
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let unit = UnitPlan::new("s.a", UnitOperation::UpdateAsDep);
        let json = serde_json::to_value(&unit).expect("serialize");
        assert_eq!(json["operation"], "update_as_dep");
        assert!(json.get("diff").is_none());
        assert!(json.get("reason").is_none());
    }
}
