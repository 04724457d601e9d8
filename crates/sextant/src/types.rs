//! Domain types for the sextant dependency index.
//!
//! These types represent the core domain model:
//! - **Facts**: `FactRecord`, `Reference` (one record per analyzed source file)
//! - **Keys**: `Fingerprint`, `CacheKey` (content addressing for the cache)
//! - **Kinds**: `ComponentKind`, `NodeKind`, `EdgeKind`
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Record shape | Fixed kind enum + open attribute map | Kind-specific extras stay forward compatible |
//! | Node identity | Record `name` | One namespace across kinds; kind is a node property |
//! | Attributes | `BTreeMap` | Stable serialization order for byte-identical reports |
//! | Records | Shared as `Arc<FactRecord>` | Immutable once produced, cheap to hand out |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

// ============================================================================
// Enums
// ============================================================================

/// Artifact kinds produced by the external extractors.
///
/// The declaration order is the order kinds are listed in reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// View template (JSP, Thymeleaf, Razor, ...)
    View,
    /// MVC controller
    Controller,
    /// Service class
    Service,
    /// Persistence mapper (interface plus XML statements)
    Mapper,
    /// Database table
    Table,
    /// Stored procedure
    Procedure,
}

impl ComponentKind {
    /// Every component kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::View,
        Self::Controller,
        Self::Service,
        Self::Mapper,
        Self::Table,
        Self::Procedure,
    ];

    /// Lowercase name used in file names, config and JSON.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Controller => "controller",
            Self::Service => "service",
            Self::Mapper => "mapper",
            Self::Table => "table",
            Self::Procedure => "procedure",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown component kind: {s}"))
    }
}

/// Kind of a graph node.
///
/// Mirrors [`ComponentKind`] plus `External` for placeholders that were
/// referenced without any kind hint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// View template
    View,
    /// MVC controller
    Controller,
    /// Service class
    Service,
    /// Persistence mapper
    Mapper,
    /// Database table
    Table,
    /// Stored procedure
    Procedure,
    /// Referenced but of unknown kind
    External,
}

impl NodeKind {
    /// Lowercase name used in JSON and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Controller => "controller",
            Self::Service => "service",
            Self::Mapper => "mapper",
            Self::Table => "table",
            Self::Procedure => "procedure",
            Self::External => "external",
        }
    }
}

impl From<ComponentKind> for NodeKind {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::View => Self::View,
            ComponentKind::Controller => Self::Controller,
            ComponentKind::Service => Self::Service,
            ComponentKind::Mapper => Self::Mapper,
            ComponentKind::Table => Self::Table,
            ComponentKind::Procedure => Self::Procedure,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship carried by an edge.
///
/// Ordering follows declaration order; the smallest kind of a node pair is
/// its primary kind when a single label is needed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Method call (controller -> service, service -> service, ...)
    Calls,
    /// Template include or fragment import
    Includes,
    /// Controller/view rendering a view
    Renders,
    /// Mapper statement bound to a table
    MapsTo,
    /// Call into a stored procedure
    InvokesProc,
    /// Procedure or statement reading/writing a table
    Queries,
    /// Any other structural reference
    References,
}

impl EdgeKind {
    /// Upper-case wire name (`CALLS`, `MAPS_TO`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "CALLS",
            Self::Includes => "INCLUDES",
            Self::Renders => "RENDERS",
            Self::MapsTo => "MAPS_TO",
            Self::InvokesProc => "INVOKES_PROC",
            Self::Queries => "QUERIES",
            Self::References => "REFERENCES",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Content addressing
// ============================================================================

/// Hex digest identifying one observed state of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key: a source path paired with its fingerprint.
///
/// A changed fingerprint yields a new key; the entry under the old key is
/// never mutated and simply stops being reachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Path of the analyzed file.
    pub source_path: PathBuf,
    /// Fingerprint of the file when it was analyzed.
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    /// Build a key from its parts.
    #[must_use]
    pub fn new(source_path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            source_path: source_path.into(),
            fingerprint,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source_path.display(), self.fingerprint)
    }
}

// ============================================================================
// Facts
// ============================================================================

/// Kind-specific extras attached to a record or node.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// One outgoing reference emitted by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Name of the referenced component.
    pub target_name: String,
    /// Kind the extractor believes the target has, if it knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kind_hint: Option<ComponentKind>,
    /// Relationship this reference represents.
    pub edge_kind: EdgeKind,
}

impl Reference {
    /// Create a reference with a kind hint.
    #[must_use]
    pub fn new(target_name: impl Into<String>, hint: Option<ComponentKind>, kind: EdgeKind) -> Self {
        Self {
            target_name: target_name.into(),
            target_kind_hint: hint,
            edge_kind: kind,
        }
    }
}

/// Structural facts extracted from one source file.
///
/// Immutable once produced; the cache and the graph builder share records
/// through `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    /// Artifact kind of the file.
    pub kind: ComponentKind,
    /// Qualified component name, unique within its kind.
    pub name: String,
    /// Path the record was extracted from.
    pub source_path: PathBuf,
    /// Fingerprint of the file when it was analyzed.
    pub fingerprint: Fingerprint,
    /// Outgoing references in extractor order.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Open, kind-specific key/value extras.
    #[serde(default)]
    pub attributes: Attributes,
}

impl FactRecord {
    /// Create a record with no references or attributes.
    #[must_use]
    pub fn new(
        kind: ComponentKind,
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            source_path: source_path.into(),
            fingerprint,
            references: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Append a reference.
    #[must_use]
    pub fn with_reference(
        mut self,
        target: impl Into<String>,
        hint: Option<ComponentKind>,
        kind: EdgeKind,
    ) -> Self {
        self.references.push(Reference::new(target, hint, kind));
        self
    }

    /// Set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The cache key this record belongs under.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.source_path.clone(), self.fingerprint.clone())
    }

    /// Number of attributes carrying a non-empty value.
    ///
    /// `null`, empty strings, empty arrays and empty objects do not count.
    #[must_use]
    pub fn populated_attribute_count(&self) -> usize {
        populated_count(&self.attributes)
    }

    /// Normalize a record returned by an extractor for the given task.
    ///
    /// The source path and fingerprint are forced to the task's values, the
    /// name and reference targets are trimmed, and references with an empty
    /// target are dropped.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidRecord` analysis error when the name is empty or the
    /// record kind differs from `expected`.
    pub fn normalize(
        mut self,
        expected: ComponentKind,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Result<Self, AnalysisError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AnalysisError::invalid_record(
                path.to_path_buf(),
                "record has an empty name",
            ));
        }
        if self.kind != expected {
            return Err(AnalysisError::invalid_record(
                path.to_path_buf(),
                format!("expected a {expected} record, got {}", self.kind),
            ));
        }
        self.name = name.to_string();
        self.source_path = path.to_path_buf();
        self.fingerprint = fingerprint.clone();
        self.references.retain_mut(|reference| {
            let trimmed = reference.target_name.trim();
            if trimmed.len() != reference.target_name.len() {
                reference.target_name = trimmed.to_string();
            }
            !reference.target_name.is_empty()
        });
        Ok(self)
    }
}

/// Count attributes whose value is not null or empty.
pub(crate) fn populated_count(attributes: &Attributes) -> usize {
    attributes
        .values()
        .filter(|value| match value {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => true,
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fp() -> Fingerprint {
        Fingerprint::new("abc123")
    }

    #[rstest]
    #[case::view("view", ComponentKind::View)]
    #[case::upper("CONTROLLER", ComponentKind::Controller)]
    #[case::padded(" mapper ", ComponentKind::Mapper)]
    #[case::procedure("procedure", ComponentKind::Procedure)]
    fn component_kind_parses_case_insensitively(#[case] input: &str, #[case] expected: ComponentKind) {
        assert_eq!(input.parse::<ComponentKind>(), Ok(expected));
    }

    #[test]
    fn component_kind_rejects_unknown_names() {
        assert!("servlet".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn edge_kind_serializes_in_wire_form() {
        let json = serde_json::to_string(&EdgeKind::InvokesProc).expect("serialize");
        assert_eq!(json, "\"INVOKES_PROC\"");
        assert_eq!(EdgeKind::MapsTo.to_string(), "MAPS_TO");
    }

    #[test]
    fn populated_attribute_count_ignores_empty_values() {
        let record = FactRecord::new(ComponentKind::Service, "UserService", "a.java", fp())
            .with_attribute("package", json!("com.acme"))
            .with_attribute("annotations", json!([]))
            .with_attribute("transactional", json!(true))
            .with_attribute("comment", json!("  "))
            .with_attribute("extra", json!(null))
            .with_attribute("methods", json!({"find": 1}));

        assert_eq!(record.populated_attribute_count(), 3);
    }

    #[test]
    fn normalize_forces_task_path_and_fingerprint() {
        let record = FactRecord::new(
            ComponentKind::Controller,
            "  UserController ",
            "elsewhere.java",
            Fingerprint::new("stale"),
        )
        .with_reference(" UserService ", Some(ComponentKind::Service), EdgeKind::Calls)
        .with_reference("   ", None, EdgeKind::Calls);

        let normalized = record
            .normalize(ComponentKind::Controller, Path::new("src/UserController.java"), &fp())
            .expect("record should normalize");

        assert_eq!(normalized.name, "UserController");
        assert_eq!(normalized.source_path, PathBuf::from("src/UserController.java"));
        assert_eq!(normalized.fingerprint, fp());
        assert_eq!(normalized.references.len(), 1);
        assert_eq!(normalized.references[0].target_name, "UserService");
    }

    #[test]
    fn normalize_rejects_empty_name_and_kind_mismatch() {
        let empty = FactRecord::new(ComponentKind::View, "  ", "a.jsp", fp());
        assert!(empty.normalize(ComponentKind::View, Path::new("a.jsp"), &fp()).is_err());

        let wrong = FactRecord::new(ComponentKind::Table, "users", "a.sql", fp());
        let err = wrong
            .normalize(ComponentKind::Procedure, Path::new("a.sql"), &fp())
            .expect_err("kind mismatch should fail");
        assert!(err.message.contains("procedure"));
    }

    #[test]
    fn cache_key_display_joins_path_and_fingerprint() {
        let key = CacheKey::new("src/a.jsp", fp());
        assert_eq!(key.to_string(), "src/a.jsp@abc123");
    }
}
