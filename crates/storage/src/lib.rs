//! Storage layer for graphstore
//!
//! This crate defines what the engine needs from a backing document
//! database and ships the in-process backend:
//! - client: `DocumentClient` / `Connector` traits, `Filter`, `Update`, `IndexSpec`
//! - index: unique collection indexes (enforcement + point lookups)
//! - memory: `MemoryCluster` / `MemoryServer` / `MemoryClient`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod index;
pub mod memory;

pub use client::{Connector, Document, DocumentClient, Filter, IndexSpec, Update, WriteOutcome};
pub use index::CollectionIndex;
pub use memory::{MemoryClient, MemoryCluster, MemoryServer};
