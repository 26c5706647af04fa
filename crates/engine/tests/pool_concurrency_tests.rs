//! Multi-Threaded ClientPool Tests
//!
//! Validates that concurrent first-time lookups share one connection and
//! that data written through any handle is visible through every other.

use graphstore_core::{HostAddr, Record, Target};
use graphstore_engine::{ClientPool, DocumentStore, RecordStore, StoreConfig};
use graphstore_storage::MemoryCluster;
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn setup() -> (Arc<MemoryCluster>, Arc<ClientPool>) {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.start(HostAddr::new("localhost", None));
    let pool = Arc::new(ClientPool::new(cluster.clone()));
    (cluster, pool)
}

/// Test: racing first-time get_client calls create exactly one connection
#[test]
fn test_concurrent_first_get_client_connects_once() {
    let (cluster, pool) = setup();
    let target = Target::standalone("localhost", None);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let target = target.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pool.get_client(&target).unwrap()
            })
        })
        .collect();

    let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(cluster.connect_count(), 1);
    for client in &clients[1..] {
        assert!(Arc::ptr_eq(&clients[0], client));
    }
    assert_eq!(pool.leases(&target), THREADS);
    let server = cluster.server(&HostAddr::new("localhost", None)).unwrap();
    assert_eq!(server.open_clients(), 1);
}

/// Test: stores opened concurrently see each other's writes
#[test]
fn test_concurrent_stores_share_backing_data() {
    let (cluster, pool) = setup();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let store = DocumentStore::open(pool, &StoreConfig::default()).unwrap();
                let graph = RecordStore::open(store, Some("shared-graph")).unwrap();
                let mut rec = Record::new();
                rec.insert("writer".to_string(), json!(i));
                graph.save(&format!("node/{}", i), &rec).unwrap();
                graph.save_to_array("index", "writers", &json!(i)).unwrap();
                graph
            })
        })
        .collect();

    let graphs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(cluster.connect_count(), 1);

    for graph in &graphs {
        assert_eq!(graph.load_with_prefix("node/").unwrap().len(), THREADS);
        let writers = graph.load("index").unwrap().unwrap()["writers"].clone();
        assert_eq!(writers.as_array().unwrap().len(), THREADS);
    }
}

/// Test: leases drain to zero and the client closes exactly once
#[test]
fn test_concurrent_close_releases_all_leases() {
    let (cluster, pool) = setup();
    let config = StoreConfig::default();
    let stores: Vec<_> = (0..THREADS)
        .map(|_| DocumentStore::open(pool.clone(), &config).unwrap())
        .collect();
    let target = config.target().unwrap();
    assert_eq!(pool.leases(&target), THREADS);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = stores
        .into_iter()
        .map(|store| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.close();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(pool.is_empty());
    let server = cluster.server(&HostAddr::new("localhost", None)).unwrap();
    assert_eq!(server.open_clients(), 0);
}
