//! DocumentStore: the tenancy-aware collection handle
//!
//! ## Tenancy modes
//!
//! | Mode | Physical layout | Compound key | Unique index |
//! |------|-----------------|--------------|--------------|
//! | `Shared` | `<db>.contexts` shared by every graph | `(_graph, _key)` | `graph_key_idx` |
//! | `Isolated` | `<token>.contexts`, one database per graph | `_id` | `_id_` |
//!
//! In shared mode the index is ensured once, when the store opens. In
//! isolated mode it is ensured per tenant when a [`TenantScope`] is bound.
//! Index creation is idempotent, so any number of stores may open the same
//! collection concurrently.
//!
//! ## Lifetime
//!
//! A DocumentStore holds one lease on its pooled client. Many RecordStores
//! share one DocumentStore through `Arc`; `close` (or drop) releases the
//! lease, and the pool closes the connection only once no store holds it.

use crate::config::StoreConfig;
use crate::pool::ClientPool;
use graphstore_core::{hash_identifier, CollectionPath, Error, PrefixMatcher, Result, Target};
use graphstore_storage::{Document, DocumentClient, Filter, IndexSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Collection holding graph records, in every layout
pub const COLLECTION_NAME: &str = "contexts";

/// Shared mode: field holding the tenant token
pub const GRAPH_FIELD: &str = "_graph";

/// Shared mode: field holding the record key
pub const KEY_FIELD: &str = "_key";

/// Isolated mode: primary key field holding the record key
pub const ID_FIELD: &str = "_id";

/// Shared mode: unique index over the compound key
pub const COMPOUND_INDEX_NAME: &str = "graph_key_idx";

/// Isolated mode: unique index over `_id`
pub const ID_INDEX_NAME: &str = "_id_";

const SHARED_RESERVED: &[&str] = &[GRAPH_FIELD, KEY_FIELD];
const ISOLATED_RESERVED: &[&str] = &[ID_FIELD];

/// Characters a database name may not contain
const INVALID_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// Longest database name the backend accepts
const MAX_DATABASE_NAME_LEN: usize = 64;

/// How logical graphs map onto physical collections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyMode {
    /// All graphs in one collection, keyed by (tenant token, record key)
    #[default]
    Shared,
    /// One database per graph, keyed by record key
    Isolated,
}

/// Unique index protecting the shared compound key
pub fn compound_index() -> IndexSpec {
    IndexSpec::unique(COMPOUND_INDEX_NAME, &[KEY_FIELD, GRAPH_FIELD])
}

/// Unique index protecting per-tenant primary keys
pub fn id_index() -> IndexSpec {
    IndexSpec::unique(ID_INDEX_NAME, &[ID_FIELD])
}

#[derive(Debug)]
enum Layout {
    Shared { path: CollectionPath },
    Isolated,
}

// ============================================================================
// TenantScope
// ============================================================================

/// One graph's view of the physical layout
///
/// Builds every filter and key field a RecordStore needs, so call sites
/// never branch on the tenancy mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    path: CollectionPath,
    token: String,
    mode: TenancyMode,
}

impl TenantScope {
    /// Collection holding the graph's records
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Tenant token stored with (or naming the database of) every record
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Layout this scope addresses
    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    /// Field holding the record key
    pub fn key_field(&self) -> &'static str {
        match self.mode {
            TenancyMode::Shared => KEY_FIELD,
            TenancyMode::Isolated => ID_FIELD,
        }
    }

    /// Fields callers may never read or write
    pub fn reserved_fields(&self) -> &'static [&'static str] {
        match self.mode {
            TenancyMode::Shared => SHARED_RESERVED,
            TenancyMode::Isolated => ISOLATED_RESERVED,
        }
    }

    /// Whether `field` is reserved in this layout
    pub fn is_reserved(&self, field: &str) -> bool {
        self.reserved_fields().contains(&field)
    }

    /// Every record of the graph
    pub fn tenant_filter(&self) -> Filter {
        match self.mode {
            TenancyMode::Shared => Filter::eq(GRAPH_FIELD, self.token.as_str()),
            TenancyMode::Isolated => Filter::All,
        }
    }

    /// Exactly the record stored under `key`
    pub fn key_filter(&self, key: &str) -> Filter {
        self.tenant_filter().and(Filter::eq(self.key_field(), key))
    }

    /// Every record whose key matches `matcher`
    pub fn prefix_filter(&self, matcher: PrefixMatcher) -> Filter {
        self.tenant_filter().and(Filter::prefix(self.key_field(), matcher))
    }

    /// The compound-key fields for `key`
    pub fn key_fields(&self, key: &str) -> Document {
        let mut doc = Document::new();
        if self.mode == TenancyMode::Shared {
            doc.insert(GRAPH_FIELD.to_string(), Value::String(self.token.clone()));
        }
        doc.insert(self.key_field().to_string(), Value::String(key.to_string()));
        doc
    }

    /// Record key stored in `doc`
    pub fn record_key(&self, doc: &Document) -> Option<String> {
        doc.get(self.key_field())
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Remove the reserved fields from `doc`
    pub fn strip_reserved(&self, mut doc: Document) -> Document {
        for field in self.reserved_fields() {
            doc.remove(*field);
        }
        doc
    }
}

// ============================================================================
// DocumentStore
// ============================================================================

/// Collection handle shared by every RecordStore on one backend
#[derive(Debug)]
pub struct DocumentStore {
    pool: Arc<ClientPool>,
    target: Target,
    client: Arc<dyn DocumentClient>,
    layout: Layout,
    hash_identifiers: bool,
    closed: AtomicBool,
}

impl DocumentStore {
    /// Open a store as described by `config`
    ///
    /// Obtains a client from `pool` and, in shared mode, ensures the unique
    /// compound index before returning.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable` if the backend cannot be reached
    /// - `IndexConflict` if an incompatible index already uses the name
    pub fn open(pool: Arc<ClientPool>, config: &StoreConfig) -> Result<Arc<Self>> {
        let target = config.target()?;
        let client = pool.get_client(&target)?;

        let layout = match config.tenancy {
            TenancyMode::Shared => Layout::Shared {
                path: CollectionPath::new(config.database_name(), COLLECTION_NAME),
            },
            TenancyMode::Isolated => Layout::Isolated,
        };

        let store = Self {
            pool,
            target,
            client,
            layout,
            hash_identifiers: config.hash_identifiers,
            closed: AtomicBool::new(false),
        };

        // On failure `store` drops here and gives its lease back
        if let Layout::Shared { path } = &store.layout {
            store.client.create_index(path, &compound_index())?;
        }

        info!(
            target: "graphstore::store",
            endpoint = %store.target,
            mode = ?store.mode(),
            hash_identifiers = store.hash_identifiers,
            "Opened document store"
        );
        Ok(Arc::new(store))
    }

    /// Tenancy mode
    pub fn mode(&self) -> TenancyMode {
        match self.layout {
            Layout::Shared { .. } => TenancyMode::Shared,
            Layout::Isolated => TenancyMode::Isolated,
        }
    }

    /// Target the store is connected to
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Whether identifiers are stored hashed
    pub fn hashes_identifiers(&self) -> bool {
        self.hash_identifiers
    }

    /// The shared collection, in shared mode
    pub fn shared_collection(&self) -> Option<&CollectionPath> {
        match &self.layout {
            Layout::Shared { path } => Some(path),
            Layout::Isolated => None,
        }
    }

    /// The raw client
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` once the store has been closed.
    pub fn client(&self) -> Result<&Arc<dyn DocumentClient>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::unavailable(self.target.address(), "document store closed"));
        }
        Ok(&self.client)
    }

    /// Token under which `identifier` is stored
    ///
    /// # Errors
    ///
    /// In isolated mode without hashing, returns `InvalidKey` if the
    /// identifier cannot be used as a database name.
    pub fn tenant_token(&self, identifier: &str) -> Result<String> {
        if self.hash_identifiers {
            return Ok(hash_identifier(identifier));
        }
        if self.mode() == TenancyMode::Isolated {
            validate_database_name(identifier)?;
        }
        Ok(identifier.to_string())
    }

    /// Bind a graph to its physical location
    ///
    /// In isolated mode this ensures the per-tenant unique index.
    pub fn scope(&self, identifier: &str) -> Result<TenantScope> {
        let token = self.tenant_token(identifier)?;
        let scope = match &self.layout {
            Layout::Shared { path } => {
                self.client()?;
                TenantScope {
                    path: path.clone(),
                    token,
                    mode: TenancyMode::Shared,
                }
            }
            Layout::Isolated => {
                let path = CollectionPath::new(token.clone(), COLLECTION_NAME);
                self.client()?.create_index(&path, &id_index())?;
                TenantScope {
                    path,
                    token,
                    mode: TenancyMode::Isolated,
                }
            }
        };
        debug!(target: "graphstore::store", path = %scope.path, "Bound tenant scope");
        Ok(scope)
    }

    /// Release this store's lease on the client
    ///
    /// Idempotent. The connection closes only when no other store uses it.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closed_client = self.pool.release(&self.target, &self.client);
        info!(target: "graphstore::store", endpoint = %self.target, closed_client, "Closed document store");
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_key("graph identifier must not be empty"));
    }
    if name.len() > MAX_DATABASE_NAME_LEN {
        return Err(Error::invalid_key(format!(
            "graph identifier longer than {} bytes cannot name a database",
            MAX_DATABASE_NAME_LEN
        )));
    }
    if let Some(c) = name.chars().find(|c| INVALID_DATABASE_CHARS.contains(c)) {
        return Err(Error::invalid_key(format!(
            "graph identifier {:?} contains {:?}, which cannot appear in a database name",
            name, c
        )));
    }
    Ok(())
}

// ============================================================================
// Cleanup
// ============================================================================

/// Drop the databases a config's stores write to
///
/// Shared mode drops the (mock or default) shared database. Isolated mode
/// drops every database on the server. Returns the dropped names.
///
/// # Errors
///
/// Enumeration or drop failures are returned as `Error::Batch` naming the
/// database being processed.
pub fn cleanup(pool: &ClientPool, config: &StoreConfig) -> Result<Vec<String>> {
    let target = config.target()?;
    let client = pool.get_client(&target)?;
    let result = drop_databases(client.as_ref(), config);
    pool.release(&target, &client);
    result
}

fn drop_databases(client: &dyn DocumentClient, config: &StoreConfig) -> Result<Vec<String>> {
    let names = client
        .list_database_names()
        .map_err(|e| Error::batch("*", e))?;
    let mut dropped = Vec::new();
    for name in names {
        let selected = match config.tenancy {
            TenancyMode::Shared => name == config.database_name(),
            TenancyMode::Isolated => true,
        };
        if !selected {
            continue;
        }
        client
            .drop_database(&name)
            .map_err(|e| Error::batch(name.clone(), e))?;
        info!(target: "graphstore::store", database = %name, "Dropped database");
        dropped.push(name);
    }
    Ok(dropped)
}
