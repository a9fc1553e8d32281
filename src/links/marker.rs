//! Link records and deterministic marker strings.
//!
//! A marker is the textual stand-in for a cross-unit reference. It is
//! embedded in unit configuration during reference expansion and later
//! replaced by the referenced output value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::error::LinkError;

/// Number of hex characters of the path digest used on each side of a marker.
pub const MARKER_HASH_LEN: usize = 32;

/// Characters outside this set are collapsed to `_` inside markers.
#[allow(clippy::expect_used)]
static MARKER_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-\.]+").expect("marker escape pattern is valid"));

/// Matches anything shaped like `<hash>.<path>.<hash>`.
#[allow(clippy::expect_used)]
static MARKER_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{32}\.[A-Za-z0-9_\-\.]+?\.[0-9a-f]{32}").expect("marker pattern is valid")
});

/// Kind of cross-unit reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Reference to a named output of another unit.
    Output,
    /// Reference to another unit's remote state output.
    RemoteState,
    /// Ordering-only dependency declared with `depends_on`.
    DependsOn,
}

/// A directed reference from a consuming unit to a target unit output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Reference kind.
    pub link_type: LinkType,
    /// Stack of the target unit.
    pub target_stack_name: String,
    /// Name of the target unit.
    pub target_unit_name: String,
    /// Output name; empty for `depends_on` links.
    #[serde(default)]
    pub output_name: String,
    /// Resolved output value, once the target has been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
}

impl Link {
    /// Creates an output link.
    #[must_use]
    pub fn output(stack: &str, unit: &str, output: &str) -> Self {
        Self::new(LinkType::Output, stack, unit, output)
    }

    /// Creates a remote state link.
    #[must_use]
    pub fn remote_state(stack: &str, unit: &str, output: &str) -> Self {
        Self::new(LinkType::RemoteState, stack, unit, output)
    }

    /// Creates an ordering-only link.
    #[must_use]
    pub fn depends_on(stack: &str, unit: &str) -> Self {
        Self::new(LinkType::DependsOn, stack, unit, "")
    }

    fn new(link_type: LinkType, stack: &str, unit: &str, output: &str) -> Self {
        Self {
            link_type,
            target_stack_name: stack.to_string(),
            target_unit_name: unit.to_string(),
            output_name: output.to_string(),
            output_data: None,
        }
    }

    /// Key of the target unit (`stack.unit`).
    #[must_use]
    pub fn target_key(&self) -> String {
        format!("{}.{}", self.target_stack_name, self.target_unit_name)
    }

    /// Canonical path of the link tuple.
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = format!(
            "{}.{}.{}",
            self.link_type, self.target_stack_name, self.target_unit_name
        );
        if !self.output_name.is_empty() {
            path.push('.');
            path.push_str(&self.output_name);
        }
        path
    }

    /// Human-readable stand-in used when the output is not yet known.
    #[must_use]
    pub fn placeholder(&self) -> String {
        if self.output_name.is_empty() {
            format!("<output {}>", self.target_key())
        } else {
            format!("<output {}.{}>", self.target_key(), self.output_name)
        }
    }

    /// Returns true if the link carries an output value.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        matches!(self.link_type, LinkType::Output | LinkType::RemoteState)
    }

    /// Computes the marker for this link.
    ///
    /// # Errors
    ///
    /// Returns an error if a mandatory tuple field is empty.
    pub fn marker(&self) -> Result<String, LinkError> {
        create_marker(self)
    }
}

/// Computes the deterministic marker for a link tuple.
///
/// The same tuple always yields the same marker, across runs, so markers
/// embedded in a saved state stay comparable with the live configuration.
///
/// # Errors
///
/// Returns an error if the target stack, target unit, or (for output links) output name is empty.
pub fn create_marker(link: &Link) -> Result<String, LinkError> {
    if link.target_stack_name.is_empty() {
        return Err(LinkError::EmptyField {
            field: "target stack",
        });
    }
    if link.target_unit_name.is_empty() {
        return Err(LinkError::EmptyField {
            field: "target unit",
        });
    }
    if link.is_output() && link.output_name.is_empty() {
        return Err(LinkError::EmptyField {
            field: "output name",
        });
    }

    let path = link.path();
    let digest = hex::encode(Sha256::digest(path.as_bytes()));
    let hash = &digest[..MARKER_HASH_LEN];
    let raw = format!("{hash}.{path}.{hash}");

    Ok(MARKER_UNSAFE.replace_all(&raw, "_").into_owned())
}

/// Finds every marker-shaped substring in a text.
#[must_use]
pub fn find_markers(text: &str) -> Vec<String> {
    MARKER_SHAPE
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|m| m[..MARKER_HASH_LEN] == m[m.len() - MARKER_HASH_LEN..])
        .map(String::from)
        .collect()
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Output => "output",
            Self::RemoteState => "remote_state",
            Self::DependsOn => "depends_on",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_deterministic() {
        let link = Link::output("infra1", "vpc", "vpc_id");
        let first = create_marker(&link).expect("marker");
        let second = create_marker(&Link::output("infra1", "vpc", "vpc_id")).expect("marker");
        assert_eq!(first, second);
        assert!(first.contains("output.infra1.vpc.vpc_id"));
    }

    #[test]
    fn test_marker_differs_per_tuple() {
        let a = create_marker(&Link::output("infra1", "vpc", "vpc_id")).expect("marker");
        let b = create_marker(&Link::output("infra1", "vpc", "vpc_cidr")).expect("marker");
        let c = create_marker(&Link::remote_state("infra1", "vpc", "vpc_id")).expect("marker");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_marker_escapes_unsafe_characters() {
        let marker = create_marker(&Link::output("infra 1", "vpc/a", "id")).expect("marker");
        assert!(marker.contains("output.infra_1.vpc_a.id"));
        assert!(!marker.contains(' '));
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(create_marker(&Link::output("", "vpc", "id")).is_err());
        assert!(create_marker(&Link::output("infra", "", "id")).is_err());
        assert!(create_marker(&Link::output("infra", "vpc", "")).is_err());
        assert!(create_marker(&Link::depends_on("infra", "vpc")).is_ok());
    }

    #[test]
    fn test_find_markers_in_text() {
        let marker = create_marker(&Link::output("infra", "vpc", "id")).expect("marker");
        let text = format!("id={marker} and more");
        assert_eq!(find_markers(&text), vec![marker]);
        assert!(find_markers("no markers here").is_empty());
    }

    #[test]
    fn test_placeholder() {
        assert_eq!(
            Link::output("infra", "vpc", "id").placeholder(),
            "<output infra.vpc.id>"
        );
        assert_eq!(Link::depends_on("infra", "vpc").placeholder(), "<output infra.vpc>");
    }
}
