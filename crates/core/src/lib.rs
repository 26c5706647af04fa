//! Core types for graphstore
//!
//! This crate defines the foundational pieces used throughout the system:
//! - Error: Error type hierarchy
//! - Record: JSON object stored under one record key
//! - Target / ClientOptions: where and how clients connect
//! - CollectionPath: database + collection addressed by wire operations
//! - codec: field-name escaping, identifier hashing, prefix matching

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    escape_field_name, escape_record, escape_value, hash_identifier, unescape_field_name,
    unescape_record, unescape_value, validate_field_name, validate_record_key,
    validate_value_fields, PrefixMatcher, HASH_TOKEN_LEN,
};
pub use error::{Error, Result};
pub use types::{
    ClientOptions, CollectionPath, Endpoint, HostAddr, ReadPreference, Record, Target,
    WriteConcern,
};
