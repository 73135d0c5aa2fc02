//! In-memory stores.
//!
//! Faithful enough to exercise the whole engine: the relational target has
//! a per-collection key sequence that explicit-id inserts do **not**
//! advance, which is exactly the trap the post-load resync exists for. Both
//! stores support failure injection so load and integrity paths can be
//! tested without a flaky backend.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{
    Id, Identity, IdentitySource, SourceReader, SourceRow, TargetRecord, TargetWriter,
};
use crate::error::{MigrateError, Result};
use crate::lookup::normalize_key;
use crate::report::{ReportSink, StageOutcome};

/// In-memory monolith: query id to rows.
#[derive(Default)]
pub struct MemorySource {
    queries: Mutex<HashMap<String, Vec<SourceRow>>>,
    failing: Mutex<HashSet<String>>,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register rows under a query id, replacing any previous rows.
    pub fn insert_query(&self, query_id: impl Into<String>, rows: Vec<SourceRow>) {
        self.queries.lock().insert(query_id.into(), rows);
    }

    /// Builder form of [`insert_query`] for test setup.
    ///
    /// [`insert_query`]: MemorySource::insert_query
    #[must_use]
    pub fn with_query(self, query_id: impl Into<String>, rows: Vec<SourceRow>) -> Self {
        self.insert_query(query_id, rows);
        self
    }

    /// Make a query id fail on read.
    pub fn fail_query(&self, query_id: impl Into<String>) {
        self.failing.lock().insert(query_id.into());
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn read(&self, query_id: &str) -> Result<Vec<SourceRow>> {
        if self.failing.lock().contains(query_id) {
            return Err(MigrateError::Source(format!("query '{query_id}' failed")));
        }
        self.queries
            .lock()
            .get(query_id)
            .cloned()
            .ok_or_else(|| MigrateError::Source(format!("unknown query '{query_id}'")))
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

enum StoreKind {
    Relational,
    Document,
}

/// In-memory service store.
///
/// The relational flavor keeps a per-collection sequence cursor that only
/// [`resync_sequence`] moves; inserts with explicit ids leave it behind,
/// mirroring how real sequences behave. The document flavor has no
/// sequences and rejects the resync outright.
///
/// [`resync_sequence`]: TargetWriter::resync_sequence
pub struct MemoryTarget {
    kind: StoreKind,
    collections: Mutex<HashMap<String, Vec<TargetRecord>>>,
    sequences: Mutex<HashMap<String, i64>>,
    failing_inserts: Mutex<HashSet<String>>,
    failing_clears: Mutex<HashSet<String>>,
}

impl MemoryTarget {
    /// A store with key sequences.
    #[must_use]
    pub fn relational() -> Self {
        Self::with_kind(StoreKind::Relational)
    }

    /// A store without sequences.
    #[must_use]
    pub fn document() -> Self {
        Self::with_kind(StoreKind::Document)
    }

    fn with_kind(kind: StoreKind) -> Self {
        Self {
            kind,
            collections: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            failing_inserts: Mutex::new(HashSet::new()),
            failing_clears: Mutex::new(HashSet::new()),
        }
    }

    /// Pre-populate a collection, e.g. with a previous run's leftovers.
    pub fn seed(&self, collection: impl Into<String>, records: Vec<TargetRecord>) {
        self.collections.lock().insert(collection.into(), records);
    }

    /// Snapshot of a collection's records in insertion order.
    #[must_use]
    pub fn records(&self, collection: &str) -> Vec<TargetRecord> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next inserts into a collection fail.
    pub fn fail_insert(&self, collection: impl Into<String>) {
        self.failing_inserts.lock().insert(collection.into());
    }

    /// Make clearing a collection fail.
    pub fn fail_clear(&self, collection: impl Into<String>) {
        self.failing_clears.lock().insert(collection.into());
    }

    /// Draw the next value from a collection's key sequence.
    ///
    /// What the store would hand the next application insert. Starts at 1
    /// on a fresh store and, like a real sequence, is moved only by
    /// [`resync_sequence`], never by explicit-id inserts.
    ///
    /// [`resync_sequence`]: TargetWriter::resync_sequence
    pub fn next_sequence_value(&self, collection: &str) -> i64 {
        let mut sequences = self.sequences.lock();
        let cursor = sequences.entry(collection.to_string()).or_insert(1);
        let value = *cursor;
        *cursor += 1;
        value
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn clear(&self, collection: &str) -> Result<u64> {
        if self.failing_clears.lock().contains(collection) {
            return Err(MigrateError::Target(format!(
                "clear of '{collection}' failed"
            )));
        }
        let removed = self
            .collections
            .lock()
            .insert(collection.to_string(), Vec::new())
            .map_or(0, |old| old.len());
        Ok(removed as u64)
    }

    async fn bulk_insert(&self, collection: &str, records: &[TargetRecord]) -> Result<u64> {
        if self.failing_inserts.lock().contains(collection) {
            return Err(MigrateError::Target(format!(
                "insert into '{collection}' failed"
            )));
        }
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn resync_sequence(&self, collection: &str, max_id: i64) -> Result<()> {
        if matches!(self.kind, StoreKind::Document) {
            return Err(MigrateError::Target(format!(
                "collection '{collection}' has no key sequence"
            )));
        }
        let mut sequences = self.sequences.lock();
        let cursor = sequences.entry(collection.to_string()).or_insert(1);
        if *cursor <= max_id {
            *cursor = max_id + 1;
        }
        Ok(())
    }

    async fn get_row_count(&self, collection: &str) -> Result<i64> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .map_or(0, |records| records.len() as i64))
    }

    async fn read_back(&self, collection: &str) -> Result<Vec<TargetRecord>> {
        Ok(self.records(collection))
    }

    fn db_type(&self) -> &str {
        match self.kind {
            StoreKind::Relational => "memory-relational",
            StoreKind::Document => "memory-document",
        }
    }
}

/// In-memory identity service keyed by (entity kind, normalized key).
#[derive(Default)]
pub struct MemoryIdentitySource {
    identities: Mutex<HashMap<(String, String), Identity>>,
}

impl MemoryIdentitySource {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity under a natural key. The key is normalized the
    /// same way lookups are.
    pub fn insert(&self, entity_kind: impl Into<String>, key: &str, id: Id, display_name: &str) {
        self.identities.lock().insert(
            (entity_kind.into(), normalize_key(key)),
            Identity {
                id,
                display_name: display_name.to_string(),
            },
        );
    }

    /// Builder form of [`insert`] for test setup.
    ///
    /// [`insert`]: MemoryIdentitySource::insert
    #[must_use]
    pub fn with_identity(
        self,
        entity_kind: impl Into<String>,
        key: &str,
        id: Id,
        display_name: &str,
    ) -> Self {
        self.insert(entity_kind, key, id, display_name);
        self
    }
}

#[async_trait]
impl IdentitySource for MemoryIdentitySource {
    async fn fetch_identities(
        &self,
        entity_kind: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Identity>> {
        let identities = self.identities.lock();
        Ok(keys
            .iter()
            .filter_map(|key| {
                identities
                    .get(&(entity_kind.to_string(), key.clone()))
                    .map(|identity| (key.clone(), identity.clone()))
            })
            .collect())
    }
}

/// Identity source that knows nothing. The runner's default.
pub struct NullIdentitySource;

#[async_trait]
impl IdentitySource for NullIdentitySource {
    async fn fetch_identities(
        &self,
        _entity_kind: &str,
        _keys: &[String],
    ) -> Result<HashMap<String, Identity>> {
        Ok(HashMap::new())
    }
}

/// Report sink that collects outcomes in memory.
#[derive(Default)]
pub struct MemoryReportSink {
    outcomes: Mutex<Vec<(String, StageOutcome)>>,
    failing: Mutex<bool>,
}

impl MemoryReportSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in arrival order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(String, StageOutcome)> {
        self.outcomes.lock().clone()
    }

    /// Make every subsequent record call fail.
    pub fn fail_all(&self) {
        *self.failing.lock() = true;
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn record(&self, entity: &str, outcome: &StageOutcome) -> Result<()> {
        if *self.failing.lock() {
            return Err(MigrateError::Report("sink unavailable".to_string()));
        }
        self.outcomes
            .lock()
            .push((entity.to_string(), outcome.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn record(id: i64) -> TargetRecord {
        let mut r = TargetRecord::new(Id::Int(id));
        r.set("name", Value::Text(format!("r{id}")));
        r
    }

    #[tokio::test]
    async fn test_source_read_and_failure() {
        let source = MemorySource::new().with_query(
            "select_users",
            vec![SourceRow::from_pairs([("id", 1i64)])],
        );
        assert_eq!(source.read("select_users").await.unwrap().len(), 1);
        assert!(source.read("missing").await.is_err());

        source.fail_query("select_users");
        assert!(source.read("select_users").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_then_insert_replaces_contents() {
        let target = MemoryTarget::relational();
        target.seed("users", vec![record(900), record(901)]);

        assert_eq!(target.clear("users").await.unwrap(), 2);
        assert_eq!(target.bulk_insert("users", &[record(1)]).await.unwrap(), 1);
        assert_eq!(target.get_row_count("users").await.unwrap(), 1);
        assert_eq!(target.read_back("users").await.unwrap()[0].id(), &Id::Int(1));
    }

    #[tokio::test]
    async fn test_explicit_inserts_do_not_advance_sequence() {
        let target = MemoryTarget::relational();
        target
            .bulk_insert("users", &[record(40)])
            .await
            .unwrap();

        // Without a resync the next generated key would collide with 1..40.
        assert_eq!(target.next_sequence_value("users"), 1);

        target.resync_sequence("users", 40).await.unwrap();
        assert_eq!(target.next_sequence_value("users"), 41);
        assert_eq!(target.next_sequence_value("users"), 42);
    }

    #[tokio::test]
    async fn test_resync_never_moves_backwards() {
        let target = MemoryTarget::relational();
        target.resync_sequence("users", 100).await.unwrap();
        target.resync_sequence("users", 5).await.unwrap();
        assert_eq!(target.next_sequence_value("users"), 101);
    }

    #[tokio::test]
    async fn test_document_store_rejects_resync() {
        let target = MemoryTarget::document();
        assert!(target.resync_sequence("roles", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let target = MemoryTarget::relational();
        target.fail_insert("users");
        assert!(target.bulk_insert("users", &[record(1)]).await.is_err());

        target.fail_clear("users");
        assert!(target.clear("users").await.is_err());
    }

    #[tokio::test]
    async fn test_identity_source_matches_normalized_keys() {
        let source = MemoryIdentitySource::new().with_identity(
            "account",
            " Alice@Example.com ",
            Id::Int(101),
            "Alice",
        );
        let found = source
            .fetch_identities("account", &["alice@example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(found["alice@example.com"].id, Id::Int(101));

        let missed = source
            .fetch_identities("user", &["alice@example.com".to_string()])
            .await
            .unwrap();
        assert!(missed.is_empty());
    }
}
