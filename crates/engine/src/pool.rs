//! Client pool: one live connection per target
//!
//! Opening a connection is expensive, so every store that targets the same
//! backend shares one client. The pool is an explicit object owned by the
//! composition root and handed to stores as `Arc<ClientPool>`.
//!
//! ## Leases
//!
//! Each `get_client` takes a lease on the entry; `release` gives it back.
//! The client is closed and evicted when its last lease is released, so a
//! store closing its handle never cuts off another store sharing the client.
//!
//! ## Concurrency
//!
//! The whole lookup-or-connect sequence runs under one process-wide lock.
//! Two threads resolving the same target for the first time therefore
//! produce exactly one connection; the second thread finds the first one's
//! entry. Connection setup for one target blocks lookups for others.
//!
//! Uses parking_lot::Mutex so a panicking connector cannot poison the pool.

use graphstore_core::{Result, Target};
use graphstore_storage::{Connector, DocumentClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct PoolEntry {
    client: Arc<dyn DocumentClient>,
    leases: usize,
}

/// Process-wide cache of backend clients keyed by target
pub struct ClientPool {
    connector: Arc<dyn Connector>,
    clients: Mutex<HashMap<Target, PoolEntry>>,
}

impl fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool")
            .field("clients", &self.clients.lock().len())
            .finish()
    }
}

impl ClientPool {
    /// Create an empty pool that opens clients through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Cached client for `target`, connecting on first use
    ///
    /// Takes a lease that must be given back with [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the target cannot be reached. Nothing is
    /// cached in that case, so a later call retries.
    pub fn get_client(&self, target: &Target) -> Result<Arc<dyn DocumentClient>> {
        let mut clients = self.clients.lock();

        if let Some(entry) = clients.get_mut(target) {
            if !entry.client.is_closed() {
                entry.leases += 1;
                debug!(target: "graphstore::pool", endpoint = %target, leases = entry.leases, "Reusing client");
                return Ok(Arc::clone(&entry.client));
            }
            warn!(target: "graphstore::pool", endpoint = %target, "Cached client was closed externally, reconnecting");
            clients.remove(target);
        }

        let client = self.connector.connect(target).map_err(|e| {
            warn!(target: "graphstore::pool", endpoint = %target, error = %e, "Connect failed");
            e
        })?;
        info!(target: "graphstore::pool", endpoint = %target, "Opened client");
        clients.insert(
            target.clone(),
            PoolEntry {
                client: Arc::clone(&client),
                leases: 1,
            },
        );
        Ok(client)
    }

    /// Give back one lease on `client`, obtained for `target`
    ///
    /// Returns `true` if this was the last lease and the client was closed.
    /// A lease on a client the pool no longer caches (evicted after an
    /// external close, or by `close_all`) is stale and leaves the current
    /// entry untouched.
    pub fn release(&self, target: &Target, client: &Arc<dyn DocumentClient>) -> bool {
        let mut clients = self.clients.lock();
        let Some(entry) = clients.get_mut(target) else {
            return false;
        };
        if !Arc::ptr_eq(&entry.client, client) {
            debug!(target: "graphstore::pool", endpoint = %target, "Ignoring stale lease");
            return false;
        }
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases > 0 {
            debug!(target: "graphstore::pool", endpoint = %target, leases = entry.leases, "Released lease");
            return false;
        }
        if let Some(entry) = clients.remove(target) {
            entry.client.close();
        }
        info!(target: "graphstore::pool", endpoint = %target, "Closed client after last lease");
        true
    }

    /// Close and evict every client regardless of outstanding leases
    pub fn close_all(&self) {
        let mut clients = self.clients.lock();
        for (target, entry) in clients.drain() {
            entry.client.close();
            info!(target: "graphstore::pool", endpoint = %target, leases = entry.leases, "Closed client");
        }
    }

    /// Whether a client for `target` is cached
    pub fn contains(&self, target: &Target) -> bool {
        self.clients.lock().contains_key(target)
    }

    /// Outstanding leases on `target`
    pub fn leases(&self, target: &Target) -> usize {
        self.clients.lock().get(target).map_or(0, |e| e.leases)
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

impl Drop for ClientPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
