//! Core traits for store-agnostic migration.
//!
//! This module defines the seams where concrete infrastructure plugs in:
//!
//! - [`SourceReader`]: Reads rows from the monolith schema
//! - [`TargetWriter`]: Clears and loads collections in a service store
//! - [`IdentitySource`]: Resolves natural keys against an external service
//!
//! The engine only ever talks to these traits; per-service stores and the
//! monolith connection are supplied by the caller. In-memory implementations
//! live in [`crate::stores`] for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

use super::record::{SourceRow, TargetRecord};
use super::value::Id;

/// Read rows from the source schema.
///
/// The engine hands over opaque query identifiers from the migration plan;
/// the implementation owns the actual SQL text. Extraction is whole-entity:
/// one call returns every row of a record set or edge query.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Run the query registered under `query_id` and return all of its rows.
    async fn read(&self, query_id: &str) -> Result<Vec<SourceRow>>;

    /// Get the store type identifier (e.g., "postgres", "memory").
    fn db_type(&self) -> &str;
}

/// Write records into one service's store.
///
/// Loading is always clear-then-reload: the engine calls [`clear`] on every
/// collection of an entity before the first [`bulk_insert`], never an
/// incremental upsert.
///
/// [`clear`]: TargetWriter::clear
/// [`bulk_insert`]: TargetWriter::bulk_insert
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Delete every record in a collection. Returns the number deleted.
    async fn clear(&self, collection: &str) -> Result<u64>;

    /// Insert records into a collection. Returns the number inserted.
    async fn bulk_insert(&self, collection: &str, records: &[TargetRecord]) -> Result<u64>;

    /// Advance the collection's key sequence past `max_id`.
    ///
    /// Required after loading preserved integer identifiers: explicit-id
    /// inserts do not advance a sequence on their own, and the next
    /// application insert would collide without this call. Stores without
    /// sequences reject it.
    async fn resync_sequence(&self, collection: &str, max_id: i64) -> Result<()>;

    /// Get the record count of a collection.
    async fn get_row_count(&self, collection: &str) -> Result<i64>;

    /// Re-read every record of a collection for integrity verification.
    async fn read_back(&self, collection: &str) -> Result<Vec<TargetRecord>>;

    /// Get the store type identifier (e.g., "postgres", "document", "memory").
    fn db_type(&self) -> &str;
}

/// An identity resolved from an external service by natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// The identifier the owning service knows this record by.
    pub id: Id,
    /// Human-readable name, carried for report and log context.
    pub display_name: String,
}

/// Resolve natural keys against a service that already owns its data.
///
/// Used when a migrated entity must reference records that were not part of
/// the migration (e.g., accounts already living in an account service).
/// Implementations receive keys already normalized by the
/// [`crate::lookup::LookupCache`] and must compare normalized on their side
/// as well.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Fetch identities for a batch of normalized keys in one round trip.
    ///
    /// Keys with no match are simply absent from the returned map; absence
    /// is not an error.
    async fn fetch_identities(
        &self,
        entity_kind: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Identity>>;
}
