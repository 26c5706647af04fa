//! Tenancy engine for graphstore
//!
//! This crate maps logical graphs onto the backing document store:
//! - config: `StoreConfig` loaded from `graphstore.toml`
//! - pool: `ClientPool`, one shared client per connection target
//! - document_store: `DocumentStore` and the shared/isolated tenancy layouts
//! - record_store: `RecordStore`, the per-graph key/record API
//!
//! The engine is the only component that knows about:
//! - Tenant tokens and reserved key fields
//! - Index bootstrap for each layout
//! - Client leases across stores

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod document_store;
pub mod pool;
pub mod record_store;

pub use config::{StoreConfig, CONFIG_FILE_NAME, DATABASE_NAME, MOCK_DATABASE_NAME};
pub use document_store::{cleanup, DocumentStore, TenancyMode, TenantScope, COLLECTION_NAME};
pub use pool::ClientPool;
pub use record_store::RecordStore;
