//! Collection indexes for the in-process document server
//!
//! A collection keeps one [`CollectionIndex`] per [`IndexSpec`]. Unique
//! indexes map the indexed field values of each document to its slot id,
//! which both enforces uniqueness and turns full-key equality filters into
//! O(1) lookups. Non-unique definitions are recorded but not maintained.

use crate::client::{Document, Filter, IndexSpec};
use graphstore_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Canonical rendering of the indexed values of one document
type IndexKey = Vec<String>;

/// One index over a collection
#[derive(Debug, Clone)]
pub struct CollectionIndex {
    spec: IndexSpec,
    entries: HashMap<IndexKey, u64>,
}

impl CollectionIndex {
    /// Build an index over existing documents
    ///
    /// Fails with `DuplicateKey` if a unique index cannot be satisfied.
    pub fn build<'a>(
        spec: IndexSpec,
        docs: impl IntoIterator<Item = (&'a u64, &'a Document)>,
    ) -> Result<Self> {
        let mut index = Self {
            spec,
            entries: HashMap::new(),
        };
        for (id, doc) in docs {
            index.check(doc, None)?;
            index.insert(*id, doc);
        }
        Ok(index)
    }

    /// Index definition
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    fn key_for(&self, doc: &Document) -> IndexKey {
        self.spec
            .fields
            .iter()
            .map(|f| doc.get(f).unwrap_or(&Value::Null).to_string())
            .collect()
    }

    /// Verify `doc` can be stored in slot `own_id` (or a new slot)
    pub fn check(&self, doc: &Document, own_id: Option<u64>) -> Result<()> {
        if !self.spec.unique {
            return Ok(());
        }
        let key = self.key_for(doc);
        match self.entries.get(&key) {
            Some(existing) if Some(*existing) != own_id => Err(Error::DuplicateKey {
                index: self.spec.name.clone(),
                key: format!("({})", key.join(", ")),
            }),
            _ => Ok(()),
        }
    }

    /// Record `doc` at slot `id`
    pub fn insert(&mut self, id: u64, doc: &Document) {
        if self.spec.unique {
            let key = self.key_for(doc);
            self.entries.insert(key, id);
        }
    }

    /// Forget `doc`
    pub fn remove(&mut self, doc: &Document) {
        if self.spec.unique {
            let key = self.key_for(doc);
            self.entries.remove(&key);
        }
    }

    /// Slot of the document a filter pins down, if the filter's equalities
    /// cover every indexed field
    ///
    /// `Some(None)` means the index answered and nothing matches.
    pub fn lookup(&self, filter: &Filter) -> Option<Option<u64>> {
        if !self.spec.unique {
            return None;
        }
        let equalities = filter.equalities();
        let mut key = Vec::with_capacity(self.spec.fields.len());
        for field in &self.spec.fields {
            let (_, value) = equalities.iter().find(|(f, _)| *f == field.as_str())?;
            key.push(value.to_string());
        }
        Some(self.entries.get(&key).copied())
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
