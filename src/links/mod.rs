//! Cross-unit references.
//!
//! This module handles deferred references between units:
//! - Deterministic markers embedded in unit configuration
//! - The per-run [`LinkRegistry`] mapping markers to link records
//! - Typed scans that discover dependencies and substitute resolved outputs

mod marker;
mod registry;
mod scan;

pub use marker::{create_marker, find_markers, Link, LinkType, MARKER_HASH_LEN};
pub use registry::LinkRegistry;
pub use scan::{
    ensure_no_markers, for_each_string, resolve_outputs, scan, with_placeholders,
    DependencyScanner, MarkerVisitor, OutputReplacer, PlaceholderReplacer,
};
