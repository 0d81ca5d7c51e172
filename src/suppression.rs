//! Duplicate-alert suppression.
//!
//! A [`SuppressionStore`] remembers when each suppression key last fired.
//! The [`Deduplicator`] consults it before every candidate notification and
//! fails open: if the store cannot be read or written, the alert fires.
//! Duplicates are acceptable, missed alerts are not.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::Storage;

const SUPPRESSION_SCHEMA_VERSION: &str = "studysync.suppression.v1";

fn default_schema_version() -> String {
    SUPPRESSION_SCHEMA_VERSION.to_string()
}

/// Durable key → last-fired mapping.
pub trait SuppressionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    fn set(&self, key: &str, at: DateTime<Utc>) -> Result<()>;

    /// Drop entries last fired before `cutoff`; returns how many were removed.
    fn compact(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn len(&self) -> Result<usize>;

    /// Record `now` under `key` iff more than `min_interval` has passed.
    ///
    /// Stores shared between processes should override this to do the
    /// read and the write under one lock.
    fn check_and_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> Result<bool> {
        if !window_elapsed(self.get(key)?, now, min_interval) {
            return Ok(false);
        }
        self.set(key, now)?;
        Ok(true)
    }
}

/// `now - last > min_interval`, with a missing entry treated as -infinity.
pub fn window_elapsed(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_interval: Duration,
) -> bool {
    match last {
        Some(last) => now - last > min_interval,
        None => true,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SuppressionDocument {
    #[serde(default = "default_schema_version")]
    schema_version: String,
    #[serde(default)]
    entries: BTreeMap<String, DateTime<Utc>>,
}

/// Suppression map persisted in `.studysync/suppression.json`.
///
/// Every operation takes the file lock, so several `watch` processes of the
/// same user can share it. Concurrent firings of the same key may still
/// both succeed when they race on separate lock acquisitions, which only
/// produces a duplicate alert.
#[derive(Debug, Clone)]
pub struct FileSuppressionStore {
    storage: Storage,
}

impl FileSuppressionStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn load(&self) -> Result<SuppressionDocument> {
        Ok(self
            .storage
            .read_json(&self.storage.suppression_file())?
            .unwrap_or_default())
    }

    /// Every recorded key with its last-fired time.
    pub fn entries(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(self.load()?.entries)
    }

    fn update<R, F>(&self, mutate: F) -> Result<R>
    where
        F: FnOnce(&mut BTreeMap<String, DateTime<Utc>>) -> (bool, R),
    {
        self.storage.ensure_initialized()?;
        self.storage.update_json(
            &self.storage.suppression_file(),
            |doc: &mut SuppressionDocument| {
                doc.schema_version = default_schema_version();
                Ok(mutate(&mut doc.entries))
            },
        )
    }
}

impl SuppressionStore for FileSuppressionStore {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load()?.entries.get(key).copied())
    }

    fn set(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), at);
            (true, ())
        })
    }

    fn compact(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|_, fired_at| *fired_at >= cutoff);
            let removed = before - entries.len();
            (removed > 0, removed)
        })
    }

    fn len(&self) -> Result<usize> {
        Ok(self.load()?.entries.len())
    }

    fn check_and_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> Result<bool> {
        self.update(|entries| {
            if !window_elapsed(entries.get(key).copied(), now, min_interval) {
                return (false, false);
            }
            entries.insert(key.to_string(), now);
            (true, true)
        })
    }
}

/// Process-local store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySuppressionStore {
    entries: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemorySuppressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<String, DateTime<Utc>>) -> R) -> Result<R> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| Error::OperationFailed("suppression map poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl SuppressionStore for MemorySuppressionStore {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_entries(|entries| entries.get(key).copied())
    }

    fn set(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), at);
        })
    }

    fn compact(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, fired_at| *fired_at >= cutoff);
            before - entries.len()
        })
    }

    fn len(&self) -> Result<usize> {
        self.with_entries(|entries| entries.len())
    }

    fn check_and_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> Result<bool> {
        self.with_entries(|entries| {
            if !window_elapsed(entries.get(key).copied(), now, min_interval) {
                return false;
            }
            entries.insert(key.to_string(), now);
            true
        })
    }
}

/// Decides whether a keyed alert may fire now.
pub struct Deduplicator {
    store: Arc<dyn SuppressionStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn SuppressionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn SuppressionStore {
        self.store.as_ref()
    }

    /// True iff more than `min_interval` passed since `key` last fired.
    ///
    /// Records `now` under `key` when returning true. Store failures fail
    /// open.
    pub fn should_fire(&self, key: &str, now: DateTime<Utc>, min_interval: Duration) -> bool {
        match self.store.check_and_record(key, now, min_interval) {
            Ok(fire) => {
                tracing::debug!(key, fire, "suppression check");
                fire
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "suppression store unavailable, firing anyway");
                true
            }
        }
    }

    /// Drop entries older than `max_age`. Errors are logged and count as 0.
    pub fn compact(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let cutoff = now
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store.compact(cutoff) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(removed, "compacted suppression store");
                }
                removed
            }
            Err(err) => {
                tracing::warn!(error = %err, "suppression compaction failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    struct BrokenStore;

    impl SuppressionStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<DateTime<Utc>>> {
            Err(Error::OperationFailed("disk gone".to_string()))
        }
        fn set(&self, _key: &str, _at: DateTime<Utc>) -> Result<()> {
            Err(Error::OperationFailed("disk gone".to_string()))
        }
        fn compact(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
            Err(Error::OperationFailed("disk gone".to_string()))
        }
        fn len(&self) -> Result<usize> {
            Err(Error::OperationFailed("disk gone".to_string()))
        }
    }

    #[test]
    fn window_is_strictly_greater_than_interval() {
        let dedup = Deduplicator::new(Arc::new(MemorySuppressionStore::new()));
        let hour = Duration::hours(1);
        assert!(dedup.should_fire("k", t0(), hour));
        assert!(!dedup.should_fire("k", t0() + Duration::minutes(30), hour));
        assert!(!dedup.should_fire("k", t0() + Duration::minutes(60), hour));
        assert!(dedup.should_fire("k", t0() + Duration::minutes(61), hour));
    }

    #[test]
    fn suppressed_check_does_not_move_the_window() {
        let store = Arc::new(MemorySuppressionStore::new());
        let dedup = Deduplicator::new(store.clone());
        assert!(dedup.should_fire("k", t0(), Duration::hours(1)));
        assert!(!dedup.should_fire("k", t0() + Duration::minutes(59), Duration::hours(1)));
        assert_eq!(store.get("k").unwrap(), Some(t0()));
    }

    #[test]
    fn keys_are_independent() {
        let dedup = Deduplicator::new(Arc::new(MemorySuppressionStore::new()));
        assert!(dedup.should_fire("deadline-t1-3h", t0(), Duration::hours(1)));
        assert!(dedup.should_fire("deadline-t1-2h", t0(), Duration::hours(1)));
        assert!(dedup.should_fire("deadline-t2-3h", t0(), Duration::hours(1)));
    }

    #[test]
    fn broken_store_fails_open() {
        let dedup = Deduplicator::new(Arc::new(BrokenStore));
        assert!(dedup.should_fire("k", t0(), Duration::hours(1)));
        assert!(dedup.should_fire("k", t0(), Duration::hours(1)));
        assert_eq!(dedup.compact(t0(), Duration::hours(48)), 0);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        storage.init().unwrap();

        let first = Deduplicator::new(Arc::new(FileSuppressionStore::new(storage.clone())));
        assert!(first.should_fire("deadline-t1-1h", t0(), Duration::hours(1)));

        let reopened = Deduplicator::new(Arc::new(FileSuppressionStore::new(storage)));
        assert!(!reopened.should_fire(
            "deadline-t1-1h",
            t0() + Duration::minutes(10),
            Duration::hours(1)
        ));
    }

    #[test]
    fn compaction_drops_old_entries_only() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        storage.init().unwrap();
        let store = Arc::new(FileSuppressionStore::new(storage));

        store.set("old", t0() - Duration::hours(72)).unwrap();
        store.set("recent", t0() - Duration::hours(2)).unwrap();

        let dedup = Deduplicator::new(store.clone());
        assert_eq!(dedup.compact(t0(), Duration::hours(48)), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("recent").unwrap().is_some());
        assert_eq!(dedup.compact(t0(), Duration::hours(48)), 0);
    }

    #[test]
    fn compaction_with_unrepresentable_age_keeps_everything() {
        let store = Arc::new(MemorySuppressionStore::new());
        store.set("k", t0() - Duration::days(400)).unwrap();
        let dedup = Deduplicator::new(store.clone());

        assert_eq!(dedup.compact(t0(), Duration::MAX), 0);
        assert_eq!(dedup.compact(t0(), Duration::days(100_000_000)), 0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn uninitialized_file_store_fails_open() {
        let dir = TempDir::new().unwrap();
        let store = FileSuppressionStore::new(Storage::new(dir.path()));
        assert!(matches!(
            store.set("k", t0()),
            Err(Error::NotInitialized(_))
        ));
        let dedup = Deduplicator::new(Arc::new(store));
        assert!(dedup.should_fire("k", t0(), Duration::hours(1)));
        assert!(dedup.should_fire("k", t0(), Duration::hours(1)));
    }
}
