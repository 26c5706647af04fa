//! RecordStore: key/record operations for one logical graph
//!
//! A RecordStore is the per-graph facade callers use. It binds a graph
//! identifier to a [`TenantScope`] on a shared [`DocumentStore`] and turns
//! each operation into a single wire call, so every write is atomic on the
//! backend.
//!
//! Field names are escaped on the way in and unescaped on the way out;
//! the reserved key fields never appear in records handed back to callers.

use crate::document_store::{DocumentStore, TenantScope};
use graphstore_core::{
    escape_field_name, escape_record, escape_value, unescape_record, validate_field_name,
    validate_record_key, validate_value_fields, Error, PrefixMatcher, Record, Result,
};
use graphstore_storage::{Document, Update};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Record operations scoped to one logical graph
#[derive(Debug)]
pub struct RecordStore {
    store: Arc<DocumentStore>,
    identifier: String,
    scope: TenantScope,
}

impl RecordStore {
    /// Open the graph `identifier` on `store`
    ///
    /// Without an identifier a fresh random one is generated, giving a new
    /// empty graph.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable` if `store` is closed or unreachable
    /// - `InvalidKey` if the identifier cannot be mapped to a tenant
    pub fn open(store: Arc<DocumentStore>, identifier: Option<&str>) -> Result<Self> {
        let identifier = match identifier {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let scope = store.scope(&identifier)?;
        debug!(
            target: "graphstore::records",
            graph = %identifier,
            token = %scope.token(),
            "Opened record store"
        );
        Ok(Self {
            store,
            identifier,
            scope,
        })
    }

    /// Logical graph identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Tenant token records are stored under
    pub fn token(&self) -> &str {
        self.scope.token()
    }

    /// Physical location of this graph
    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// The document store this graph lives on
    pub fn document_store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Record stored under `key`
    ///
    /// A record that exists but has no fields loads as an empty record.
    pub fn load(&self, key: &str) -> Result<Option<Record>> {
        validate_record_key(key)?;
        let doc = self
            .store
            .client()?
            .find_one(self.scope.path(), &self.scope.key_filter(key))?;
        trace!(target: "graphstore::records", graph = %self.identifier, key, found = doc.is_some(), "load");
        Ok(doc.map(|d| self.to_record(d)))
    }

    /// Every record whose key starts with `prefix`
    ///
    /// The empty prefix selects the whole graph.
    pub fn load_with_prefix(&self, prefix: &str) -> Result<BTreeMap<String, Record>> {
        if prefix.contains('\0') {
            return Err(Error::invalid_key("key prefix contains NUL"));
        }
        let filter = self.scope.prefix_filter(PrefixMatcher::new(prefix));
        let docs = self.store.client()?.find(self.scope.path(), &filter)?;

        let mut records = BTreeMap::new();
        for doc in docs {
            let Some(key) = self.scope.record_key(&doc) else {
                continue;
            };
            records.insert(key, self.to_record(doc));
        }
        trace!(target: "graphstore::records", graph = %self.identifier, prefix, count = records.len(), "load_with_prefix");
        Ok(records)
    }

    /// Store `record` under `key`, replacing any previous record
    pub fn save(&self, key: &str, record: &Record) -> Result<()> {
        validate_record_key(key)?;
        for (field, value) in record {
            self.check_field(field)?;
            validate_value_fields(value)?;
        }

        let mut doc = self.scope.key_fields(key);
        doc.extend(escape_record(record));
        let outcome = self.store.client()?.replace_one(
            self.scope.path(),
            &self.scope.key_filter(key),
            doc,
            true,
        )?;
        trace!(target: "graphstore::records", graph = %self.identifier, key, upserted = outcome.upserted, "save");
        Ok(())
    }

    /// Add `value` to the array `field` of `key` unless already present
    ///
    /// Creates the record and the array when missing.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `field` holds something other than an array.
    pub fn save_to_array(&self, key: &str, field: &str, value: &Value) -> Result<()> {
        validate_value_fields(value)?;
        let update = Update::AddToSet {
            field: self.prepare(key, field)?,
            value: escape_value(value),
        };
        self.update(key, &update, true)
    }

    /// Set `field` of `key` to `value`
    ///
    /// Creates the record when missing.
    pub fn save_to_object(&self, key: &str, field: &str, value: &Value) -> Result<()> {
        validate_value_fields(value)?;
        let update = Update::Set {
            field: self.prepare(key, field)?,
            value: escape_value(value),
        };
        self.update(key, &update, true)
    }

    /// Delete every record whose key starts with `key`
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// `InvalidKey` for the empty key; use [`clear`](Self::clear) to
    /// delete a whole graph.
    pub fn delete(&self, key: &str) -> Result<u64> {
        validate_record_key(key)?;
        let filter = self.scope.prefix_filter(PrefixMatcher::new(key));
        let deleted = self.store.client()?.delete_many(self.scope.path(), &filter)?;
        debug!(target: "graphstore::records", graph = %self.identifier, key, deleted, "delete");
        Ok(deleted)
    }

    /// Remove every element equal to `value` from the array `field` of `key`
    ///
    /// A missing record, field or element is a no-op.
    pub fn delete_from_array(&self, key: &str, field: &str, value: &Value) -> Result<()> {
        let update = Update::Pull {
            field: self.prepare(key, field)?,
            value: escape_value(value),
        };
        self.update(key, &update, false)
    }

    /// Remove `field` from `key`
    ///
    /// A missing record or field is a no-op.
    pub fn delete_from_object(&self, key: &str, field: &str) -> Result<()> {
        let update = Update::Unset {
            field: self.prepare(key, field)?,
        };
        self.update(key, &update, false)
    }

    /// Delete every record of the graph
    pub fn clear(&self) -> Result<u64> {
        let deleted = self
            .store
            .client()?
            .delete_many(self.scope.path(), &self.scope.tenant_filter())?;
        debug!(target: "graphstore::records", graph = %self.identifier, deleted, "clear");
        Ok(deleted)
    }

    /// Number of records in the graph
    pub fn len(&self) -> Result<u64> {
        self.store
            .client()?
            .count(self.scope.path(), &self.scope.tenant_filter())
    }

    /// Check if the graph has no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn update(&self, key: &str, update: &Update, upsert: bool) -> Result<()> {
        let outcome = self.store.client()?.update_one(
            self.scope.path(),
            &self.scope.key_filter(key),
            update,
            upsert,
        )?;
        trace!(
            target: "graphstore::records",
            graph = %self.identifier,
            key,
            field = update.field(),
            modified = outcome.modified,
            upserted = outcome.upserted,
            "update"
        );
        Ok(())
    }

    /// Validate `key` and `field`, returning the stored field name
    fn prepare(&self, key: &str, field: &str) -> Result<String> {
        validate_record_key(key)?;
        self.check_field(field)?;
        Ok(escape_field_name(field).into_owned())
    }

    fn check_field(&self, field: &str) -> Result<()> {
        validate_field_name(field)?;
        if self.scope.is_reserved(field) {
            return Err(Error::invalid_field(format!(
                "field name {:?} is reserved",
                field
            )));
        }
        Ok(())
    }

    fn to_record(&self, doc: Document) -> Record {
        unescape_record(self.scope.strip_reserved(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::pool::ClientPool;
    use graphstore_core::HostAddr;
    use graphstore_storage::MemoryCluster;
    use serde_json::json;

    fn shared_store() -> (Arc<MemoryCluster>, Arc<DocumentStore>) {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.start(HostAddr::new("localhost", None));
        let pool = Arc::new(ClientPool::new(cluster.clone()));
        let store = DocumentStore::open(pool, &StoreConfig::default().with_mock(true)).unwrap();
        (cluster, store)
    }

    fn record(v: Value) -> Record {
        match v {
            Value::Object(map) => map,
            other => panic!("not an object: {:?}", other),
        }
    }

    #[test]
    fn test_save_then_load() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        let rec = record(json!({"name": "alice", "age": 3}));
        graph.save("people/alice", &rec).unwrap();
        assert_eq!(graph.load("people/alice").unwrap(), Some(rec));
        assert_eq!(graph.load("people/bob").unwrap(), None);
    }

    #[test]
    fn test_empty_record_loads_as_empty() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        graph.save("k", &Record::new()).unwrap();
        assert_eq!(graph.load("k").unwrap(), Some(Record::new()));
    }

    #[test]
    fn test_operator_field_names_round_trip() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        let rec = record(json!({"$type": "node", "inner": {"$ref": 1}}));
        graph.save("k", &rec).unwrap();
        assert_eq!(graph.load("k").unwrap(), Some(rec));

        graph.save_to_object("k", "$meta", &json!({"$x": true})).unwrap();
        let loaded = graph.load("k").unwrap().unwrap();
        assert_eq!(loaded["$meta"], json!({"$x": true}));
    }

    #[test]
    fn test_reserved_fields_rejected() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        let err = graph.save("k", &record(json!({"_graph": "other"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
        assert!(graph.save_to_object("k", "_key", &json!(1)).unwrap_err().is_malformed_input());
        assert_eq!(graph.load("k").unwrap(), None);
    }

    #[test]
    fn test_escape_sequence_field_names_rejected() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();

        let err = graph.save("k", &record(json!({"\\$a": 1}))).unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
        let colliding = record(json!({"$a": 1, "\\$a": 2}));
        assert!(graph.save("k2", &colliding).unwrap_err().is_malformed_input());
        let nested = record(json!({"outer": [{"\\$b": true}]}));
        assert!(graph.save("k3", &nested).unwrap_err().is_malformed_input());

        assert!(graph.save_to_object("k", "\\$a", &json!(1)).unwrap_err().is_malformed_input());
        assert!(graph
            .save_to_object("k", "f", &json!({"\\$x": 1}))
            .unwrap_err()
            .is_malformed_input());
        assert!(graph
            .save_to_array("k", "tags", &json!({"in": {"\\$y": 1}}))
            .unwrap_err()
            .is_malformed_input());

        assert!(graph.load_with_prefix("").unwrap().is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        assert!(graph.load("").unwrap_err().is_malformed_input());
        assert!(graph.delete("").unwrap_err().is_malformed_input());
        assert!(graph.save_to_array("", "f", &json!(1)).unwrap_err().is_malformed_input());
    }

    #[test]
    fn test_array_ops() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        graph.save_to_array("k", "tags", &json!("a")).unwrap();
        graph.save_to_array("k", "tags", &json!("a")).unwrap();
        graph.save_to_array("k", "tags", &json!("b")).unwrap();
        assert_eq!(graph.load("k").unwrap().unwrap()["tags"], json!(["a", "b"]));

        graph.delete_from_array("k", "tags", &json!("a")).unwrap();
        graph.delete_from_array("k", "tags", &json!("zzz")).unwrap();
        graph.delete_from_array("missing", "tags", &json!("a")).unwrap();
        assert_eq!(graph.load("k").unwrap().unwrap()["tags"], json!(["b"]));
        assert_eq!(graph.load("missing").unwrap(), None);
    }

    #[test]
    fn test_add_to_set_on_scalar_is_invalid_operation() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        graph.save_to_object("k", "f", &json!(5)).unwrap();
        let err = graph.save_to_array("k", "f", &json!(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[test]
    fn test_object_ops() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        graph.save_to_object("k", "a", &json!(1)).unwrap();
        graph.save_to_object("k", "b", &json!(2)).unwrap();
        graph.delete_from_object("k", "a").unwrap();
        graph.delete_from_object("k", "absent").unwrap();
        graph.delete_from_object("nope", "a").unwrap();
        assert_eq!(graph.load("k").unwrap(), Some(record(json!({"b": 2}))));
        assert_eq!(graph.load("nope").unwrap(), None);
    }

    #[test]
    fn test_prefix_delete_and_load() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store, Some("g")).unwrap();
        for key in ["a/1", "a/2", "a(x)", "b/1"] {
            graph.save(key, &record(json!({"k": key}))).unwrap();
        }
        let loaded = graph.load_with_prefix("a/").unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["a/1", "a/2"]);
        assert_eq!(graph.load_with_prefix("a(").unwrap().len(), 1);
        assert_eq!(graph.load_with_prefix("").unwrap().len(), 4);
        assert!(graph.load_with_prefix("zz").unwrap().is_empty());

        assert_eq!(graph.delete("a").unwrap(), 3);
        assert_eq!(graph.len().unwrap(), 1);
        assert_eq!(graph.clear().unwrap(), 1);
        assert!(graph.is_empty().unwrap());
    }

    #[test]
    fn test_random_identifier_when_absent() {
        let (_cluster, store) = shared_store();
        let a = RecordStore::open(store.clone(), None).unwrap();
        let b = RecordStore::open(store, None).unwrap();
        assert_ne!(a.identifier(), b.identifier());
        assert_ne!(a.token(), b.token());
        assert!(a.is_empty().unwrap());
    }

    #[test]
    fn test_operations_fail_after_store_closed() {
        let (_cluster, store) = shared_store();
        let graph = RecordStore::open(store.clone(), Some("g")).unwrap();
        store.close();
        assert!(graph.load("k").unwrap_err().is_unavailable());
        assert!(graph.save("k", &Record::new()).unwrap_err().is_unavailable());
    }
}
