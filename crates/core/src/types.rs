//! Core types for graphstore
//!
//! This module defines the foundational types:
//! - Record: one JSON object stored under one record key
//! - HostAddr: `host[:port]` of one backend server
//! - Target: connection target (standalone server or replica set) plus options
//! - ClientOptions: per-connection tuning (timeouts, read preference, write concern)
//! - CollectionPath: database + collection pair addressed by wire operations

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record: one JSON object stored as one physical document
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Address of a single backend server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    /// Host name or IP literal
    pub host: String,
    /// Port; `None` means the backend's default port
    pub port: Option<u16>,
}

impl HostAddr {
    /// Create an address
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

impl FromStr for HostAddr {
    type Err = Error;

    /// Parses `host` or `host:port`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::unavailable(s, "empty host"));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::unavailable(s, format!("invalid port '{}'", port)))?;
                Ok(Self::new(host, Some(port)))
            }
            Some(_) => Err(Error::unavailable(s, "empty host")),
            None => Ok(Self::new(s, None)),
        }
    }
}

/// Read routing for replica-set targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPreference {
    /// Always read from the primary
    #[default]
    Primary,
    /// Primary when available, otherwise a secondary
    PrimaryPreferred,
    /// Only secondaries
    Secondary,
    /// Secondaries when available, otherwise the primary
    SecondaryPreferred,
    /// Lowest-latency member
    Nearest,
}

/// Acknowledgement level for writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConcern {
    /// Fire and forget: write errors are not reported to the caller
    Unacknowledged,
    /// Acknowledged by the primary
    #[default]
    Acknowledged,
    /// Acknowledged by a majority of replicas
    ReplicaAcknowledged,
}

impl WriteConcern {
    /// Whether write errors reach the caller
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, WriteConcern::Unacknowledged)
    }
}

/// Per-connection tuning. Unset values defer to the backend's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Maximum pooled connections per host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_per_host: Option<u32>,
    /// Connect timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Socket read/write timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_timeout_ms: Option<u64>,
    /// Maximum time to wait for a pooled connection, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_time_ms: Option<u64>,
    /// Read routing
    #[serde(default)]
    pub read_preference: ReadPreference,
    /// Write acknowledgement level
    #[serde(default)]
    pub write_concern: WriteConcern,
}

/// Where a client connects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    /// A single server
    Standalone(HostAddr),
    /// A replica set, treated as one opaque target
    ReplicaSet(Vec<HostAddr>),
}

/// Connection target: endpoint plus client options
///
/// Two targets are the same cache entry only if both endpoint and options
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Server(s) to connect to
    pub endpoint: Endpoint,
    /// Client options
    pub options: ClientOptions,
}

impl Target {
    /// Standalone target with default options
    pub fn standalone(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            endpoint: Endpoint::Standalone(HostAddr::new(host, port)),
            options: ClientOptions::default(),
        }
    }

    /// Replica-set target with default options
    pub fn replica_set(members: Vec<HostAddr>) -> Self {
        Self {
            endpoint: Endpoint::ReplicaSet(members),
            options: ClientOptions::default(),
        }
    }

    /// Parse `host[:port]` into a standalone target
    pub fn parse(address: &str) -> Result<Self> {
        let addr: HostAddr = address.parse()?;
        Ok(Self {
            endpoint: Endpoint::Standalone(addr),
            options: ClientOptions::default(),
        })
    }

    /// Replace the client options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Addresses to try, in order
    pub fn hosts(&self) -> &[HostAddr] {
        match &self.endpoint {
            Endpoint::Standalone(addr) => std::slice::from_ref(addr),
            Endpoint::ReplicaSet(members) => members,
        }
    }

    /// Printable address used in logs and errors
    pub fn address(&self) -> String {
        match &self.endpoint {
            Endpoint::Standalone(addr) => addr.to_string(),
            Endpoint::ReplicaSet(members) => {
                let joined: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                format!("rs:{}", joined.join(","))
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// A (database, collection) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath {
    /// Database name
    pub database: String,
    /// Collection name within the database
    pub collection: String,
}

impl CollectionPath {
    /// Create a path
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_addr_parse() {
        let addr: HostAddr = "db1:27017".parse().unwrap();
        assert_eq!(addr, HostAddr::new("db1", Some(27017)));

        let addr: HostAddr = "localhost".parse().unwrap();
        assert_eq!(addr.port, None);
        assert_eq!(addr.to_string(), "localhost");
    }

    #[test]
    fn test_host_addr_parse_rejects_bad_port() {
        assert!("db1:notaport".parse::<HostAddr>().is_err());
        assert!(":27017".parse::<HostAddr>().is_err());
        assert!("".parse::<HostAddr>().is_err());
    }

    #[test]
    fn test_target_address() {
        assert_eq!(Target::standalone("h", Some(1)).address(), "h:1");
        let rs = Target::replica_set(vec![HostAddr::new("a", Some(1)), HostAddr::new("b", None)]);
        assert_eq!(rs.address(), "rs:a:1,b");
        assert_eq!(rs.hosts().len(), 2);
    }

    #[test]
    fn test_targets_with_different_options_differ() {
        let a = Target::standalone("h", None);
        let b = Target::standalone("h", None).with_options(ClientOptions {
            write_concern: WriteConcern::Unacknowledged,
            ..ClientOptions::default()
        });
        assert_ne!(a, b);
        assert_eq!(a, Target::parse("h").unwrap());
    }

    #[test]
    fn test_client_options_defaults() {
        let opts = ClientOptions::default();
        assert_eq!(opts.read_preference, ReadPreference::Primary);
        assert!(opts.write_concern.is_acknowledged());
        assert!(!WriteConcern::Unacknowledged.is_acknowledged());
    }

    #[test]
    fn test_collection_path_display() {
        assert_eq!(CollectionPath::new("graphstore", "contexts").to_string(), "graphstore.contexts");
    }
}
