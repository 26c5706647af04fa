//! graphstore - Multi-tenant document-store adapter for hierarchical graphs
//!
//! graphstore persists many independent logical graphs in a document
//! database. Each graph is a flat key space of JSON records; keys are
//! hierarchical strings, so a whole subtree can be read or deleted by prefix.
//!
//! # Quick Start
//!
//! ```
//! use graphstore::{ClientPool, DocumentStore, HostAddr, MemoryCluster, RecordStore, StoreConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> graphstore::Result<()> {
//! // An in-process backend; a real deployment plugs in its own Connector
//! let cluster = Arc::new(MemoryCluster::new());
//! cluster.start(HostAddr::new("localhost", None));
//! let pool = Arc::new(ClientPool::new(cluster));
//!
//! // One DocumentStore per backend, shared by every graph
//! let store = DocumentStore::open(pool, &StoreConfig::default())?;
//! let graph = RecordStore::open(store, Some("=!1111"))?;
//!
//! graph.save_to_object("people/alice", "name", &json!("Alice"))?;
//! graph.save_to_array("people/alice", "tags", &json!("friend"))?;
//!
//! let people = graph.load_with_prefix("people/")?;
//! assert_eq!(people.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `graphstore-core` | Errors, connection targets, field escaping, identifier hashing |
//! | `graphstore-storage` | Backend contract and the in-process backend |
//! | `graphstore-engine` | Client pool, tenancy layouts, the record API |
//! | `graphstore-migrate` | Legacy per-graph databases into the shared collection |

pub use graphstore_core::{
    escape_field_name, hash_identifier, unescape_field_name, ClientOptions, CollectionPath,
    Endpoint, Error, HostAddr, PrefixMatcher, ReadPreference, Record, Result, Target,
    WriteConcern,
};
pub use graphstore_engine::{
    cleanup, ClientPool, DocumentStore, RecordStore, StoreConfig, TenancyMode, TenantScope,
};
pub use graphstore_migrate::{GraphOutcome, GraphStatus, MigrationConfig, MigrationReport, Migrator};
pub use graphstore_storage::{Connector, Document, DocumentClient, MemoryCluster};
