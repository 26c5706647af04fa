//! Migration from the one-database-per-graph layout into the shared collection
//!
//! The legacy layout stores every graph in its own database, named by the
//! hash of the graph identifier, with records keyed by `_id` in a
//! `contexts` collection. The [`Migrator`] walks those databases and
//! re-inserts each record into a shared-mode [`DocumentStore`] under the
//! compound key `(_graph, _key)`.
//!
//! ## Identifier recovery
//!
//! Hashing is one-way, so the plain identifier is recovered by matching:
//! a root record (`_id` is one of the root markers) lists candidate names
//! in its `""` field; each candidate `s` gives the identifier
//! `"(" + marker + s + ")"`, accepted if it hashes to the database name.
//! Failing that, the configured special identifiers are tried.
//!
//! Graphs whose identifier cannot be recovered are counted in
//! [`MigrationReport::unknown_identifiers`]. With `use_hash` they are still
//! copied under the database name; without it they are skipped.

#![warn(missing_docs)]
#![warn(clippy::all)]

use graphstore_core::{hash_identifier, CollectionPath, Error, Result, HASH_TOKEN_LEN};
use graphstore_engine::document_store::{compound_index, GRAPH_FIELD, ID_FIELD, KEY_FIELD};
use graphstore_engine::{DocumentStore, TenancyMode, COLLECTION_NAME};
use graphstore_storage::{Document, DocumentClient, Filter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Root-record `_id` values that carry candidate identifiers
pub const DEFAULT_ROOT_MARKERS: &[&str] = &["[=]", "[@]"];

/// Field of a root record listing candidate identifiers
pub const CANDIDATES_FIELD: &str = "";

/// Migration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Store graphs under the source database name (already the hash)
    /// rather than the recovered plain identifier
    pub use_hash: bool,
    /// Count records without writing anything
    pub dry_run: bool,
    /// Well-known identifiers tried when no root record matches
    pub special_identifiers: Vec<String>,
    /// `_id` values marking root records
    pub root_markers: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            use_hash: true,
            dry_run: true,
            special_identifiers: Vec::new(),
            root_markers: DEFAULT_ROOT_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl MigrationConfig {
    /// Config that copies records (not a dry run)
    pub fn copy(use_hash: bool) -> Self {
        Self {
            use_hash,
            dry_run: false,
            ..Self::default()
        }
    }

    /// Add well-known identifiers to try during recovery
    pub fn with_special_identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_identifiers.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// What happened to one source database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStatus {
    /// Records were inserted into the destination
    Copied,
    /// Dry run: records were counted only
    Counted,
    /// No tenant token available; nothing was written
    Skipped,
}

/// Per-graph result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOutcome {
    /// Source database name
    pub database: String,
    /// Recovered plain identifier, if any
    pub identifier: Option<String>,
    /// Records copied (or counted, in a dry run)
    pub records: u64,
    /// Outcome
    pub status: GraphStatus,
}

/// Summary of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// One entry per candidate source database, in enumeration order
    pub graphs: Vec<GraphOutcome>,
    /// Candidate databases processed
    pub total_graphs: u64,
    /// Records copied or counted
    pub total_records: u64,
    /// Graphs whose identifier could not be recovered
    pub unknown_identifiers: u64,
    /// Destination records before the run
    pub destination_before: u64,
    /// Destination records after the run
    pub destination_after: u64,
}

impl MigrationReport {
    /// Records added to the destination by this run
    pub fn new_records(&self) -> u64 {
        self.destination_after.saturating_sub(self.destination_before)
    }
}

/// Copies legacy per-graph databases into a shared collection
#[derive(Debug)]
pub struct Migrator {
    source: Arc<dyn DocumentClient>,
    destination: Arc<DocumentStore>,
    config: MigrationConfig,
}

impl Migrator {
    /// Create a migrator from `source` into `destination`
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `destination` is not a shared-mode store.
    pub fn new(
        source: Arc<dyn DocumentClient>,
        destination: Arc<DocumentStore>,
        config: MigrationConfig,
    ) -> Result<Self> {
        if destination.mode() != TenancyMode::Shared {
            return Err(Error::invalid_operation(
                "migration destination must be a shared-mode store",
            ));
        }
        Ok(Self {
            source,
            destination,
            config,
        })
    }

    /// Settings for this run
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate every candidate database
    ///
    /// # Errors
    ///
    /// Enumeration, read and insert failures stop the run and are returned
    /// as `Error::Batch` naming the database being processed.
    pub fn run(&self) -> Result<MigrationReport> {
        let client = self.destination.client()?;
        let dst = self
            .destination
            .shared_collection()
            .cloned()
            .ok_or_else(|| Error::invalid_operation("destination has no shared collection"))?;

        // A dry run leaves the destination exactly as it found it
        if !self.config.dry_run {
            client
                .create_index(&dst, &compound_index())
                .map_err(|e| Error::batch(dst.database.clone(), e))?;
        }

        let mut report = MigrationReport {
            destination_before: client
                .count(&dst, &Filter::All)
                .map_err(|e| Error::batch(dst.database.clone(), e))?,
            ..MigrationReport::default()
        };
        info!(
            target: "graphstore::migrate",
            destination = %dst,
            records = report.destination_before,
            dry_run = self.config.dry_run,
            "Starting migration"
        );

        let databases = self
            .source
            .list_database_names()
            .map_err(|e| Error::batch("*", e))?;

        for database in databases {
            if database.len() != HASH_TOKEN_LEN {
                debug!(target: "graphstore::migrate", database = %database, "Skipping non-graph database");
                continue;
            }
            let outcome = self.migrate_graph(client.as_ref(), &dst, &database)?;
            info!(
                target: "graphstore::migrate",
                graph = report.total_graphs,
                database = %database,
                identifier = outcome.identifier.as_deref().unwrap_or("-"),
                records = outcome.records,
                status = ?outcome.status,
                "Migrated graph"
            );
            report.total_graphs += 1;
            report.total_records += outcome.records;
            if outcome.identifier.is_none() {
                report.unknown_identifiers += 1;
            }
            report.graphs.push(outcome);
        }

        report.destination_after = client
            .count(&dst, &Filter::All)
            .map_err(|e| Error::batch(dst.database.clone(), e))?;
        info!(
            target: "graphstore::migrate",
            total_graphs = report.total_graphs,
            total_records = report.total_records,
            unknown_identifiers = report.unknown_identifiers,
            new_records = report.new_records(),
            "Migration finished"
        );
        Ok(report)
    }

    fn migrate_graph(
        &self,
        client: &dyn DocumentClient,
        dst: &CollectionPath,
        database: &str,
    ) -> Result<GraphOutcome> {
        let src = CollectionPath::new(database, COLLECTION_NAME);
        let docs = self
            .source
            .find(&src, &Filter::All)
            .map_err(|e| Error::batch(database, e))?;

        let identifier = docs.iter().find_map(|doc| self.recover_identifier(database, doc));
        if identifier.is_none() {
            warn!(target: "graphstore::migrate", database = %database, "Graph identifier not recovered");
        }

        if self.config.dry_run {
            return Ok(GraphOutcome {
                database: database.to_string(),
                identifier,
                records: docs.len() as u64,
                status: GraphStatus::Counted,
            });
        }

        let token = if self.config.use_hash {
            Some(database.to_string())
        } else {
            identifier.clone()
        };
        let Some(token) = token else {
            return Ok(GraphOutcome {
                database: database.to_string(),
                identifier,
                records: 0,
                status: GraphStatus::Skipped,
            });
        };

        let mut records = 0;
        for doc in docs {
            client
                .insert_one(dst, rekey(doc, &token))
                .map_err(|e| Error::batch(database, e))?;
            records += 1;
        }
        Ok(GraphOutcome {
            database: database.to_string(),
            identifier,
            records,
            status: GraphStatus::Copied,
        })
    }

    /// Plain identifier of `database`, if `doc` reveals it
    pub fn recover_identifier(&self, database: &str, doc: &Document) -> Option<String> {
        let marker = doc.get(ID_FIELD).and_then(Value::as_str)?;
        if !self.config.root_markers.iter().any(|m| m == marker) {
            return None;
        }
        let candidates = doc.get(CANDIDATES_FIELD).and_then(Value::as_array)?;

        candidates
            .iter()
            .filter_map(Value::as_str)
            .map(|s| format!("({}{})", marker, s))
            .find(|id| hash_identifier(id) == database)
            .or_else(|| {
                self.config
                    .special_identifiers
                    .iter()
                    .find(|id| hash_identifier(id) == database)
                    .cloned()
            })
    }
}

/// Move the legacy `_id` into the compound key
fn rekey(mut doc: Document, token: &str) -> Document {
    let key = doc.remove(ID_FIELD).unwrap_or(Value::Null);
    doc.insert(KEY_FIELD.to_string(), key);
    doc.insert(GRAPH_FIELD.to_string(), Value::String(token.to_string()));
    doc
}
