//! Batched natural-key resolution against external services.
//!
//! Some references cannot be remapped from the source alone: the counterpart
//! record already lives in a service that was never part of the monolith
//! (accounts, for example) and must be found by natural key. The cache
//! batches those probes so a whole record set costs one round trip, and
//! memoizes hits for the rest of the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::core::{Id, Identity, IdentitySource};
use crate::error::Result;

/// Normalize a natural key for matching: trim whitespace, lowercase.
///
/// Applied to both the keys sent out and the comparisons on the far side,
/// so `" Alice@Example.com "` and `"alice@example.com"` meet in the middle.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Per-run cache in front of an [`IdentitySource`].
pub struct LookupCache {
    source: Arc<dyn IdentitySource>,
    cache: HashMap<(String, String), Identity>,
    round_trips: u64,
}

impl LookupCache {
    /// Create an empty cache over an identity source.
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self {
            source,
            cache: HashMap::new(),
            round_trips: 0,
        }
    }

    /// Resolve a batch of raw keys, fetching only what the cache misses.
    ///
    /// Keys are normalized and deduplicated first; all uncached keys go to
    /// the source in a single round trip. The returned map is keyed by
    /// normalized key and only contains hits; a missing entry means the
    /// service does not know the key, which is the caller's policy to
    /// handle.
    pub async fn resolve_batch(
        &mut self,
        entity_kind: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Identity>> {
        let mut wanted: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for raw in keys {
            let key = normalize_key(raw);
            if seen.insert(key.clone()) {
                wanted.push(key);
            }
        }

        let missing: Vec<String> = wanted
            .iter()
            .filter(|k| {
                !self
                    .cache
                    .contains_key(&(entity_kind.to_string(), (*k).clone()))
            })
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(
                "Lookup batch for {}: {} keys, {} uncached",
                entity_kind,
                wanted.len(),
                missing.len()
            );
            let fetched = self.source.fetch_identities(entity_kind, &missing).await?;
            self.round_trips += 1;
            for (key, identity) in fetched {
                self.cache
                    .insert((entity_kind.to_string(), key), identity);
            }
        }

        let mut result = HashMap::new();
        for key in wanted {
            if let Some(identity) = self.cache.get(&(entity_kind.to_string(), key.clone())) {
                result.insert(key, identity.clone());
            }
        }
        Ok(result)
    }

    /// Look up a previously fetched identity without touching the source.
    ///
    /// This is the accessor row transforms use: by the time they run, the
    /// prefetch has already paid the round trip.
    #[must_use]
    pub fn get(&self, entity_kind: &str, key: &str) -> Option<&Identity> {
        self.cache
            .get(&(entity_kind.to_string(), normalize_key(key)))
    }

    /// Number of round trips made against the source so far.
    #[must_use]
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Every identity id fetched so far in this run.
    ///
    /// Widens the reference closure during validation: a reference to a
    /// looked-up identity is as legitimate as one to a migrated record.
    #[must_use]
    pub fn known_ids(&self) -> HashSet<Id> {
        self.cache.values().map(|i| i.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CountingSource {
        calls: Mutex<u64>,
        identities: HashMap<String, Identity>,
    }

    impl CountingSource {
        fn with_accounts(pairs: &[(&str, i64)]) -> Self {
            let identities = pairs
                .iter()
                .map(|(key, id)| {
                    (
                        key.to_string(),
                        Identity {
                            id: Id::Int(*id),
                            display_name: key.to_string(),
                        },
                    )
                })
                .collect();
            Self {
                calls: Mutex::new(0),
                identities,
            }
        }
    }

    #[async_trait]
    impl IdentitySource for CountingSource {
        async fn fetch_identities(
            &self,
            _entity_kind: &str,
            keys: &[String],
        ) -> Result<HashMap<String, Identity>> {
            *self.calls.lock() += 1;
            Ok(keys
                .iter()
                .filter_map(|k| self.identities.get(k).map(|i| (k.clone(), i.clone())))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_batch_is_one_round_trip() {
        let source = Arc::new(CountingSource::with_accounts(&[
            ("alice@example.com", 101),
            ("bob@example.com", 102),
        ]));
        let mut cache = LookupCache::new(source.clone());

        let keys = vec![
            " Alice@Example.com ".to_string(),
            "bob@example.com".to_string(),
            "ALICE@EXAMPLE.COM".to_string(),
        ];
        let resolved = cache.resolve_batch("account", &keys).await.unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(
            resolved.get("alice@example.com").unwrap().id,
            Id::Int(101)
        );
        assert_eq!(*source.calls.lock(), 1);
        assert_eq!(cache.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_hits_are_memoized_across_batches() {
        let source = Arc::new(CountingSource::with_accounts(&[("alice@example.com", 101)]));
        let mut cache = LookupCache::new(source.clone());

        cache
            .resolve_batch("account", &["alice@example.com".to_string()])
            .await
            .unwrap();
        cache
            .resolve_batch("account", &["Alice@Example.com".to_string()])
            .await
            .unwrap();

        assert_eq!(*source.calls.lock(), 1);
        assert!(cache.get("account", " ALICE@example.com").is_some());
        assert!(cache.get("account", "carol@example.com").is_none());
    }

    #[tokio::test]
    async fn test_misses_are_not_errors() {
        let source = Arc::new(CountingSource::with_accounts(&[]));
        let mut cache = LookupCache::new(source);

        let resolved = cache
            .resolve_batch("account", &["ghost@example.com".to_string()])
            .await
            .unwrap();
        assert!(resolved.is_empty());
        assert!(cache.known_ids().is_empty());
    }
}
