//! Store configuration via `graphstore.toml`
//!
//! A `StoreConfig` says where the backend lives, how tenants are laid out,
//! and which client options to connect with. It is read from TOML; every
//! field has a default so an empty file is a valid config.

use crate::document_store::TenancyMode;
use graphstore_core::{ClientOptions, Error, HostAddr, Result, Target};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "graphstore.toml";

/// Host used when none is configured
pub const DEFAULT_HOST: &str = "localhost";

/// Database holding the shared `contexts` collection
pub const DATABASE_NAME: &str = "graphstore";

/// Database used instead of [`DATABASE_NAME`] when `mock = true`
pub const MOCK_DATABASE_NAME: &str = "graphstore_mock";

/// Store configuration loaded from `graphstore.toml`.
///
/// # Example
///
/// ```toml
/// host = "localhost"
/// # port = 27017
/// # replica_set = ["db1:27017", "db2:27017"]
/// tenancy = "shared"
/// hash_identifiers = true
/// mock = false
///
/// [options]
/// read_preference = "primary"
/// write_concern = "acknowledged"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend host (ignored when `replica_set` is non-empty)
    #[serde(default = "default_host")]
    pub host: String,
    /// Backend port; `None` uses the backend default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Replica-set members as `host[:port]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replica_set: Vec<String>,
    /// Shared collection or one database per tenant
    #[serde(default)]
    pub tenancy: TenancyMode,
    /// Store tenants under the hash of their identifier
    #[serde(default = "default_hash_identifiers")]
    pub hash_identifiers: bool,
    /// Use the mock database (tests and cleanup)
    #[serde(default)]
    pub mock: bool,
    /// Client options
    #[serde(default)]
    pub options: ClientOptions,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_hash_identifiers() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            replica_set: Vec::new(),
            tenancy: TenancyMode::default(),
            hash_identifiers: default_hash_identifiers(),
            mock: false,
            options: ClientOptions::default(),
        }
    }
}

impl StoreConfig {
    /// Shared-mode config for `host[:port]`
    pub fn shared(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Isolated-mode config for `host[:port]`
    pub fn isolated(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            tenancy: TenancyMode::Isolated,
            ..Self::default()
        }
    }

    /// Switch to the mock database
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Store identifiers verbatim or hashed
    pub fn with_hash_identifiers(mut self, hash: bool) -> Self {
        self.hash_identifiers = hash;
        self
    }

    /// Replace the client options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Connection target described by this config
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if a replica-set member address is invalid.
    pub fn target(&self) -> Result<Target> {
        let target = if self.replica_set.is_empty() {
            Target::standalone(self.host.clone(), self.port)
        } else {
            let members = self
                .replica_set
                .iter()
                .map(|m| m.parse::<HostAddr>())
                .collect::<Result<Vec<_>>>()?;
            Target::replica_set(members)
        };
        Ok(target.with_options(self.options.clone()))
    }

    /// Database holding the shared collection
    pub fn database_name(&self) -> &'static str {
        if self.mock {
            MOCK_DATABASE_NAME
        } else {
            DATABASE_NAME
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# graphstore configuration
#
# Backend address. Set replica_set instead to connect to a replica set.
host = "localhost"
# port = 27017
# replica_set = ["db1:27017", "db2:27017"]

# Tenancy: "shared" (one collection, compound key) or "isolated"
# (one database per graph)
tenancy = "shared"

# Store graphs under the SHA-256 hash of their identifier
hash_identifiers = true

# Use the mock database (tests only)
mock = false

[options]
read_preference = "primary"
write_concern = "acknowledged"
# connections_per_host = 10
# connect_timeout_ms = 5000
# socket_timeout_ms = 0
# max_wait_time_ms = 120000
"#
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Serialization {
            reason: format!("failed to parse config: {}", e),
        })
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Serialization {
            reason: format!("failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| Error::Config {
            reason: format!("failed to write config file '{}': {}", path.display(), e),
        })
    }
}
