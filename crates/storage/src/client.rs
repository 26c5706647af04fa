//! Backing-store wire contract
//!
//! Everything the engine needs from a document database, expressed as
//! operations on a [`CollectionPath`]:
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `find_one` / `find` | Point lookup or scan by [`Filter`] |
//! | `replace_one` | Replace the matching document, optionally upserting |
//! | `update_one` | Apply one atomic [`Update`] to the matching document |
//! | `insert_one` | Insert, subject to unique indexes |
//! | `delete_many` | Remove every matching document |
//! | `create_index` | Idempotent index creation |
//! | `list_database_names` / `drop_database` | Cleanup and migration only |
//!
//! A [`Connector`] turns a [`Target`] into a live [`DocumentClient`].

use graphstore_core::{CollectionPath, Error, PrefixMatcher, Result, Target};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A stored document
pub type Document = Map<String, Value>;

// ============================================================================
// Filters
// ============================================================================

/// Document selector
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document
    All,
    /// Field equals value
    Eq(String, Value),
    /// String field matches an anchored prefix pattern
    Prefix(String, PrefixMatcher),
    /// All sub-filters match
    And(Vec<Filter>),
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// `field` starts with the matcher's prefix
    pub fn prefix(field: impl Into<String>, matcher: PrefixMatcher) -> Self {
        Filter::Prefix(field.into(), matcher)
    }

    /// Conjunction of `self` and `other`
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field).unwrap_or(&Value::Null) == value,
            Filter::Prefix(field, matcher) => match doc.get(field) {
                Some(Value::String(s)) => matcher.matches(s),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }

    /// Equality constraints; these seed the document created by an upsert
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::Eq(field, value) => vec![(field.as_str(), value)],
            Filter::And(filters) => filters.iter().flat_map(|f| f.equalities()).collect(),
            Filter::All | Filter::Prefix(..) => Vec::new(),
        }
    }
}

// ============================================================================
// Updates
// ============================================================================

/// One atomic single-field update
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Set `field` to `value`
    Set {
        /// Target field
        field: String,
        /// New value
        value: Value,
    },
    /// Remove `field`
    Unset {
        /// Target field
        field: String,
    },
    /// Append `value` to the array `field` unless already present
    AddToSet {
        /// Target array field
        field: String,
        /// Element to add
        value: Value,
    },
    /// Remove every element equal to `value` from the array `field`
    Pull {
        /// Target array field
        field: String,
        /// Element to remove
        value: Value,
    },
}

impl Update {
    /// Field the update touches
    pub fn field(&self) -> &str {
        match self {
            Update::Set { field, .. }
            | Update::Unset { field }
            | Update::AddToSet { field, .. }
            | Update::Pull { field, .. } => field,
        }
    }

    /// Apply to `doc`; returns whether the document changed
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        match self {
            Update::Set { field, value } => {
                let previous = doc.insert(field.clone(), value.clone());
                Ok(previous.as_ref() != Some(value))
            }
            Update::Unset { field } => Ok(doc.remove(field).is_some()),
            Update::AddToSet { field, value } => match doc.get_mut(field) {
                None => {
                    doc.insert(field.clone(), Value::Array(vec![value.clone()]));
                    Ok(true)
                }
                Some(Value::Array(items)) => {
                    if items.contains(value) {
                        Ok(false)
                    } else {
                        items.push(value.clone());
                        Ok(true)
                    }
                }
                Some(_) => Err(Error::invalid_operation(format!(
                    "cannot add to set: field '{}' is not an array",
                    field
                ))),
            },
            Update::Pull { field, value } => match doc.get_mut(field) {
                None => Ok(false),
                Some(Value::Array(items)) => {
                    let before = items.len();
                    items.retain(|item| item != value);
                    Ok(items.len() != before)
                }
                Some(_) => Err(Error::invalid_operation(format!(
                    "cannot pull from field '{}': not an array",
                    field
                ))),
            },
        }
    }
}

// ============================================================================
// Indexes
// ============================================================================

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    /// Index name, unique per collection
    pub name: String,
    /// Indexed fields, in order
    pub fields: Vec<String>,
    /// Reject documents that repeat an existing key
    pub unique: bool,
}

impl IndexSpec {
    /// Unique index over `fields`
    pub fn unique(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: true,
        }
    }
}

/// Result of a single-document write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Documents whose content changed
    pub modified: u64,
    /// A new document was created by upsert
    pub upserted: bool,
}

// ============================================================================
// Client traits
// ============================================================================

/// A live connection to a backing store
///
/// All methods are synchronous; each single-document write is atomic.
pub trait DocumentClient: Send + Sync + fmt::Debug {
    /// Target this client was opened for
    fn target(&self) -> &Target;

    /// First document matching `filter`
    fn find_one(&self, path: &CollectionPath, filter: &Filter) -> Result<Option<Document>>;

    /// Every document matching `filter`
    fn find(&self, path: &CollectionPath, filter: &Filter) -> Result<Vec<Document>>;

    /// Replace the document matching `filter` with `doc`
    ///
    /// With `upsert`, a missing document is created from `doc` plus the
    /// filter's equality fields.
    fn replace_one(
        &self,
        path: &CollectionPath,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<WriteOutcome>;

    /// Apply `update` to the document matching `filter`
    ///
    /// With `upsert`, a missing document is created from the filter's
    /// equality fields before the update is applied.
    fn update_one(
        &self,
        path: &CollectionPath,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteOutcome>;

    /// Insert a new document
    fn insert_one(&self, path: &CollectionPath, doc: Document) -> Result<()>;

    /// Remove every document matching `filter`; returns the count removed
    fn delete_many(&self, path: &CollectionPath, filter: &Filter) -> Result<u64>;

    /// Count documents matching `filter`
    fn count(&self, path: &CollectionPath, filter: &Filter) -> Result<u64>;

    /// Create `spec` if absent; identical existing definition is success
    fn create_index(&self, path: &CollectionPath, spec: &IndexSpec) -> Result<()>;

    /// Names of every database on the server
    fn list_database_names(&self) -> Result<Vec<String>>;

    /// Drop a database and everything in it
    fn drop_database(&self, name: &str) -> Result<()>;

    /// Close the connection; later calls fail with store-unavailable
    fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// Opens clients for targets
pub trait Connector: Send + Sync {
    /// Connect to `target`, failing with `Error::StoreUnavailable` when it
    /// cannot be reached
    fn connect(&self, target: &Target) -> Result<Arc<dyn DocumentClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use proptest::prelude::*;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_eq_and_prefix() {
        let d = doc(json!({"_graph": "g1", "_key": "a/b"}));
        assert!(Filter::eq("_graph", "g1").matches(&d));
        assert!(!Filter::eq("_graph", "g2").matches(&d));
        assert!(Filter::prefix("_key", PrefixMatcher::new("a/")).matches(&d));
        assert!(!Filter::prefix("_key", PrefixMatcher::new("x/")).matches(&d));
        assert!(!Filter::prefix("missing", PrefixMatcher::new("")).matches(&d));
    }

    #[test]
    fn test_filter_and_flattens() {
        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match &f {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
        assert_eq!(Filter::All.and(Filter::eq("a", 1)), Filter::eq("a", 1));
        assert_eq!(f.equalities().len(), 3);
    }

    #[test]
    fn test_add_to_set_is_idempotent() {
        let mut d = Document::new();
        let up = Update::AddToSet {
            field: "tags".into(),
            value: json!("x"),
        };
        assert!(up.apply(&mut d).unwrap());
        assert!(!up.apply(&mut d).unwrap());
        assert_eq!(d["tags"], json!(["x"]));
    }

    #[test]
    fn test_add_to_set_rejects_non_array() {
        let mut d = doc(json!({"tags": "scalar"}));
        let up = Update::AddToSet {
            field: "tags".into(),
            value: json!("x"),
        };
        assert!(matches!(up.apply(&mut d), Err(Error::InvalidOperation { .. })));
    }

    #[test]
    fn test_pull_and_unset_on_missing_are_noops() {
        let mut d = doc(json!({"other": 1}));
        let pull = Update::Pull {
            field: "tags".into(),
            value: json!("x"),
        };
        let unset = Update::Unset { field: "f".into() };
        assert!(!pull.apply(&mut d).unwrap());
        assert!(!unset.apply(&mut d).unwrap());
        assert_eq!(d, doc(json!({"other": 1})));
    }

    #[test]
    fn test_pull_removes_all_equal_elements() {
        let mut d = doc(json!({"tags": ["x", "y", "x"]}));
        let pull = Update::Pull {
            field: "tags".into(),
            value: json!("x"),
        };
        assert!(pull.apply(&mut d).unwrap());
        assert_eq!(d["tags"], json!(["y"]));
    }

    #[test]
    fn test_set_reports_modification() {
        let mut d = Document::new();
        let set = Update::Set {
            field: "f".into(),
            value: json!(1),
        };
        assert!(set.apply(&mut d).unwrap());
        assert!(!set.apply(&mut d).unwrap());
        assert_eq!(set.field(), "f");
    }

    proptest! {
        #[test]
        fn prop_add_to_set_then_pull_leaves_no_element(
            existing in proptest::collection::vec(0i64..8, 0..6),
            value in 0i64..8,
        ) {
            let mut d = doc(json!({"tags": existing}));
            let add = Update::AddToSet { field: "tags".into(), value: json!(value) };
            add.apply(&mut d).unwrap();
            add.apply(&mut d).unwrap();
            let count = d["tags"].as_array().unwrap().iter().filter(|v| **v == json!(value)).count();
            prop_assert!(count >= 1);

            let pull = Update::Pull { field: "tags".into(), value: json!(value) };
            prop_assert!(pull.apply(&mut d).unwrap());
            prop_assert!(!d["tags"].as_array().unwrap().contains(&json!(value)));
        }

        #[test]
        fn prop_prefix_filter_matches_starts_with(key in "[a-z/.()]{0,8}", prefix in "[a-z/.()]{0,3}") {
            let d = doc(json!({"_key": key.clone()}));
            let filter = Filter::prefix("_key", PrefixMatcher::new(prefix.clone()));
            prop_assert_eq!(filter.matches(&d), key.starts_with(&prefix));
        }
    }
}
