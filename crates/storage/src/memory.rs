//! In-process document server
//!
//! ## Design
//!
//! - [`MemoryCluster`]: address book of running servers (`host[:port]` →
//!   server). It is the [`Connector`]: connecting to an address with no
//!   running server fails with store-unavailable.
//! - [`MemoryServer`]: databases → collections → documents, all behind one
//!   `RwLock`. Every single-document operation holds the write lock for its
//!   whole read-modify-write, so each update is atomic.
//! - [`MemoryClient`]: one connection. Honors the target's write concern
//!   (unacknowledged writes swallow errors) and `connections_per_host`.
//!
//! Documents live in a `BTreeMap<u64, Document>` per collection so that
//! scans return insertion order and indexes can refer to stable slot ids.

use crate::client::{
    Connector, Document, DocumentClient, Filter, IndexSpec, Update, WriteOutcome,
};
use crate::index::CollectionIndex;
use dashmap::DashMap;
use graphstore_core::{CollectionPath, Error, HostAddr, Result, Target};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Default)]
struct MemoryCollection {
    docs: BTreeMap<u64, Document>,
    indexes: Vec<CollectionIndex>,
    next_id: u64,
}

impl MemoryCollection {
    fn matching_ids(&self, filter: &Filter) -> Vec<u64> {
        for index in &self.indexes {
            if let Some(hit) = index.lookup(filter) {
                return hit
                    .filter(|id| self.docs.get(id).is_some_and(|d| filter.matches(d)))
                    .into_iter()
                    .collect();
            }
        }
        self.docs
            .iter()
            .filter(|(_, d)| filter.matches(d))
            .map(|(id, _)| *id)
            .collect()
    }

    fn first_match(&self, filter: &Filter) -> Option<u64> {
        self.matching_ids(filter).into_iter().next()
    }

    fn check_indexes(&self, doc: &Document, own_id: Option<u64>) -> Result<()> {
        self.indexes.iter().try_for_each(|i| i.check(doc, own_id))
    }

    fn insert(&mut self, doc: Document) -> Result<u64> {
        self.check_indexes(&doc, None)?;
        let id = self.next_id;
        self.next_id += 1;
        for index in &mut self.indexes {
            index.insert(id, &doc);
        }
        self.docs.insert(id, doc);
        Ok(id)
    }

    fn replace(&mut self, id: u64, doc: Document) -> Result<()> {
        self.check_indexes(&doc, Some(id))?;
        if let Some(old) = self.docs.remove(&id) {
            for index in &mut self.indexes {
                index.remove(&old);
            }
        }
        for index in &mut self.indexes {
            index.insert(id, &doc);
        }
        self.docs.insert(id, doc);
        Ok(())
    }

    fn remove(&mut self, id: u64) {
        if let Some(old) = self.docs.remove(&id) {
            for index in &mut self.indexes {
                index.remove(&old);
            }
        }
    }

    fn ensure_index(&mut self, spec: &IndexSpec) -> Result<bool> {
        if let Some(existing) = self.indexes.iter().find(|i| i.spec().name == spec.name) {
            if existing.spec() == spec {
                return Ok(false);
            }
            return Err(Error::IndexConflict {
                name: spec.name.clone(),
            });
        }
        let index = CollectionIndex::build(spec.clone(), self.docs.iter())?;
        self.indexes.push(index);
        Ok(true)
    }
}

/// Seed document for an upsert: the filter's equality fields
fn upsert_seed(filter: &Filter) -> Document {
    filter
        .equalities()
        .into_iter()
        .map(|(f, v)| (f.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Server
// ============================================================================

type Databases = BTreeMap<String, BTreeMap<String, MemoryCollection>>;

/// One running in-process document server
#[derive(Debug)]
pub struct MemoryServer {
    addr: HostAddr,
    databases: RwLock<Databases>,
    open_clients: AtomicUsize,
    running: AtomicBool,
}

impl MemoryServer {
    fn new(addr: HostAddr) -> Self {
        Self {
            addr,
            databases: RwLock::new(BTreeMap::new()),
            open_clients: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        }
    }

    /// Address the server listens on
    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    /// Number of clients currently connected
    pub fn open_clients(&self) -> usize {
        self.open_clients.load(Ordering::SeqCst)
    }

    /// Whether the server accepts operations
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total documents across every database
    pub fn document_count(&self) -> usize {
        self.databases
            .read()
            .values()
            .flat_map(|db| db.values())
            .map(|c| c.docs.len())
            .sum()
    }

    fn read<T>(&self, path: &CollectionPath, f: impl FnOnce(&MemoryCollection) -> T) -> T
    where
        T: Default,
    {
        let dbs = self.databases.read();
        match dbs.get(&path.database).and_then(|db| db.get(&path.collection)) {
            Some(coll) => f(coll),
            None => T::default(),
        }
    }

    fn write<T>(
        &self,
        path: &CollectionPath,
        f: impl FnOnce(&mut MemoryCollection) -> Result<T>,
    ) -> Result<T> {
        let mut dbs = self.databases.write();
        let db = dbs.entry(path.database.clone()).or_default();
        let coll = db.entry(path.collection.clone()).or_default();
        let result = f(coll);

        // Writes that stored nothing must not leave an empty collection behind
        if coll.docs.is_empty() && coll.indexes.is_empty() {
            db.remove(&path.collection);
            if db.is_empty() {
                dbs.remove(&path.database);
            }
        }
        result
    }
}

// ============================================================================
// Cluster (connector)
// ============================================================================

/// Registry of running in-process servers, addressed like network hosts
#[derive(Debug, Default)]
pub struct MemoryCluster {
    servers: DashMap<HostAddr, Arc<MemoryServer>>,
    connects: AtomicU64,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a server at `addr`, or return the one already running there
    pub fn start(&self, addr: HostAddr) -> Arc<MemoryServer> {
        self.servers
            .entry(addr.clone())
            .or_insert_with(|| {
                info!(target: "graphstore::memory", addr = %addr, "Starting in-process document server");
                Arc::new(MemoryServer::new(addr))
            })
            .clone()
    }

    /// Stop the server at `addr`; its clients become unavailable
    pub fn stop(&self, addr: &HostAddr) -> bool {
        match self.servers.remove(addr) {
            Some((_, server)) => {
                server.running.store(false, Ordering::SeqCst);
                info!(target: "graphstore::memory", addr = %addr, "Stopped in-process document server");
                true
            }
            None => false,
        }
    }

    /// Running server at `addr`
    pub fn server(&self, addr: &HostAddr) -> Option<Arc<MemoryServer>> {
        self.servers.get(addr).map(|s| Arc::clone(s.value()))
    }

    /// Number of successful `connect` calls so far
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryCluster {
    fn connect(&self, target: &Target) -> Result<Arc<dyn DocumentClient>> {
        let server = target
            .hosts()
            .iter()
            .find_map(|addr| self.server(addr))
            .ok_or_else(|| Error::unavailable(target.address(), "no server reachable"))?;

        if let Some(limit) = target.options.connections_per_host {
            if server.open_clients() >= limit as usize {
                return Err(Error::unavailable(
                    target.address(),
                    format!("connection limit of {} reached", limit),
                ));
            }
        }

        server.open_clients.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(target: "graphstore::memory", endpoint = %target, server = %server.addr(), "Client connected");
        Ok(Arc::new(MemoryClient {
            target: target.clone(),
            server,
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Client
// ============================================================================

/// A connection to a [`MemoryServer`]
#[derive(Debug)]
pub struct MemoryClient {
    target: Target,
    server: Arc<MemoryServer>,
    closed: AtomicBool,
}

impl MemoryClient {
    fn live(&self) -> Result<&MemoryServer> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::unavailable(self.target.address(), "client closed"));
        }
        if !self.server.is_running() {
            return Err(Error::unavailable(self.target.address(), "server stopped"));
        }
        Ok(&self.server)
    }

    /// Apply the write concern: unacknowledged writes report success unless
    /// the connection itself is gone
    fn acknowledge<T: Default>(&self, op: &str, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if !self.target.options.write_concern.is_acknowledged() && !e.is_unavailable() => {
                warn!(target: "graphstore::memory", op, error = %e, "Unacknowledged write failed");
                Ok(T::default())
            }
            other => other,
        }
    }
}

impl DocumentClient for MemoryClient {
    fn target(&self) -> &Target {
        &self.target
    }

    fn find_one(&self, path: &CollectionPath, filter: &Filter) -> Result<Option<Document>> {
        let server = self.live()?;
        Ok(server.read(path, |c| {
            c.first_match(filter).and_then(|id| c.docs.get(&id).cloned())
        }))
    }

    fn find(&self, path: &CollectionPath, filter: &Filter) -> Result<Vec<Document>> {
        let server = self.live()?;
        Ok(server.read(path, |c| {
            c.matching_ids(filter)
                .into_iter()
                .filter_map(|id| c.docs.get(&id).cloned())
                .collect()
        }))
    }

    fn replace_one(
        &self,
        path: &CollectionPath,
        filter: &Filter,
        doc: Document,
        upsert: bool,
    ) -> Result<WriteOutcome> {
        let server = self.live()?;
        let result = server.write(path, |c| match c.first_match(filter) {
            Some(id) => {
                let modified = c.docs.get(&id) != Some(&doc);
                c.replace(id, doc)?;
                Ok(WriteOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted: false,
                })
            }
            None if upsert => {
                let mut seeded = upsert_seed(filter);
                seeded.extend(doc);
                c.insert(seeded)?;
                Ok(WriteOutcome {
                    upserted: true,
                    ..WriteOutcome::default()
                })
            }
            None => Ok(WriteOutcome::default()),
        });
        self.acknowledge("replace_one", result)
    }

    fn update_one(
        &self,
        path: &CollectionPath,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteOutcome> {
        let server = self.live()?;
        let result = server.write(path, |c| match c.first_match(filter) {
            Some(id) => {
                let mut doc = c.docs.get(&id).cloned().unwrap_or_default();
                let modified = update.apply(&mut doc)?;
                if modified {
                    c.replace(id, doc)?;
                }
                Ok(WriteOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted: false,
                })
            }
            None if upsert => {
                let mut doc = upsert_seed(filter);
                update.apply(&mut doc)?;
                c.insert(doc)?;
                Ok(WriteOutcome {
                    upserted: true,
                    ..WriteOutcome::default()
                })
            }
            None => Ok(WriteOutcome::default()),
        });
        self.acknowledge("update_one", result)
    }

    fn insert_one(&self, path: &CollectionPath, doc: Document) -> Result<()> {
        let server = self.live()?;
        let result = server.write(path, |c| c.insert(doc).map(|_| ()));
        self.acknowledge("insert_one", result)
    }

    fn delete_many(&self, path: &CollectionPath, filter: &Filter) -> Result<u64> {
        let server = self.live()?;
        let result = server.write(path, |c| {
            let ids = c.matching_ids(filter);
            for id in &ids {
                c.remove(*id);
            }
            Ok(ids.len() as u64)
        });
        self.acknowledge("delete_many", result)
    }

    fn count(&self, path: &CollectionPath, filter: &Filter) -> Result<u64> {
        let server = self.live()?;
        Ok(server.read(path, |c| c.matching_ids(filter).len() as u64))
    }

    fn create_index(&self, path: &CollectionPath, spec: &IndexSpec) -> Result<()> {
        let server = self.live()?;
        let created = server.write(path, |c| c.ensure_index(spec))?;
        if created {
            info!(target: "graphstore::memory", path = %path, index = %spec.name, "Index created");
        }
        Ok(())
    }

    fn list_database_names(&self) -> Result<Vec<String>> {
        let server = self.live()?;
        Ok(server.databases.read().keys().cloned().collect())
    }

    fn drop_database(&self, name: &str) -> Result<()> {
        let server = self.live()?;
        server.databases.write().remove(name);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.open_clients.fetch_sub(1, Ordering::SeqCst);
            debug!(target: "graphstore::memory", endpoint = %self.target, "Client closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.close();
    }
}
