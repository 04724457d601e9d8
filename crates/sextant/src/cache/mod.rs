//! Content-addressed fact cache.
//!
//! Stores one normalized [`FactRecord`] per [`CacheKey`] (source path +
//! fingerprint). Entries are immutable: a changed fingerprint produces a new
//! key and the old entry simply becomes unreachable.
//!
//! ## Concurrency
//!
//! - Distinct keys progress independently; the memory map is only locked for
//!   lookups and inserts, never across file I/O or extractor calls.
//! - Concurrent [`FactCache::get_or_extract`] calls for one key coalesce into a
//!   single extractor invocation ([`flight`]); every caller sees the same record
//!   or the same error.
//! - Records are published as complete `Arc<FactRecord>` values, so readers
//!   never observe a partially built record.
//!
//! ## Persistence
//!
//! With a disk area configured, entries are written through on success and
//! loaded lazily the first time a key is requested. Disk failures are logged
//! and degrade that one operation to pass-through; they never fail a lookup.
//!
//! Each source path has one live entry: the key stored or served last. A file
//! that reverts to an earlier fingerprint makes that earlier entry live again,
//! and [`FactCache::prune`] keeps exactly the live entries.

mod disk;
mod flight;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{AnalysisError, CacheError};
use crate::types::{CacheKey, FactRecord};
use disk::DiskStore;
use flight::{Flight, FlightGroup};

/// A cached record and when it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the record is stored under.
    pub key: CacheKey,
    /// The record itself.
    pub record: Arc<FactRecord>,
    /// When the extractor produced it.
    pub created_at: DateTime<Utc>,
}

/// Where a record returned by [`FactCache::get_or_extract`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Served from memory or the disk area.
    Cache,
    /// This caller ran the extractor.
    Extracted,
    /// Another caller's concurrent extraction was shared.
    Coalesced,
}

/// Result of a cache lookup that may have invoked the extractor.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The record, or the extractor's error.
    pub outcome: Result<Arc<FactRecord>, AnalysisError>,
    /// Where the outcome came from.
    pub source: LookupSource,
    /// Cache degradation encountered along the way, if any.
    pub warning: Option<String>,
}

/// Counters describing cache activity since it was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from memory or disk.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Extractor invocations.
    pub extractions: u64,
    /// Callers that shared another caller's extraction.
    pub coalesced: u64,
    /// Operations that fell back to pass-through after a disk failure.
    pub degraded: u64,
    /// Entries currently held in memory.
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    extractions: AtomicU64,
    coalesced: AtomicU64,
    degraded: AtomicU64,
}

type Shared = Result<Arc<FactRecord>, AnalysisError>;

/// Content-addressed store of fact records with single-flight extraction.
///
/// Explicitly constructed and injected; open with [`FactCache::open`] or
/// [`FactCache::in_memory`], finish with [`FactCache::close`].
#[derive(Debug)]
pub struct FactCache {
    memory: RwLock<HashMap<CacheKey, CacheEntry>>,
    latest: RwLock<HashMap<PathBuf, CacheKey>>,
    disk: Option<DiskStore>,
    flights: FlightGroup<CacheKey, (Shared, Option<String>)>,
    counters: Counters,
}

impl FactCache {
    /// Create a cache that persists entries under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let disk = DiskStore::open(dir)?;
        debug!(root = %disk.root().display(), "Opened fact cache");
        Ok(Self::with_disk(Some(disk)))
    }

    /// Create a cache that lives only as long as this value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_disk(None)
    }

    fn with_disk(disk: Option<DiskStore>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            disk,
            flights: FlightGroup::default(),
            counters: Counters::default(),
        }
    }

    /// Directory of the disk area, if persistence is enabled.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskStore::root)
    }

    /// Look up a record by key, loading it from disk on first access.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<FactRecord>> {
        let (record, warning) = self.lookup(key);
        if let Some(warning) = warning {
            warn!(key = %key, "{warning}");
        }
        record
    }

    fn lookup(&self, key: &CacheKey) -> (Option<Arc<FactRecord>>, Option<String>) {
        let cached = self.read_memory().get(key).map(|entry| Arc::clone(&entry.record));
        if let Some(record) = cached {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Cache hit (memory)");
            return (Some(record), self.touch(key));
        }

        let Some(disk) = &self.disk else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return (None, None);
        };

        match disk.load(key) {
            Ok(Some(entry)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Cache hit (disk)");
                let record = Arc::clone(&entry.record);
                self.remember(entry);
                (Some(record), self.touch(key))
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                (None, None)
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                (None, Some(format!("cache read degraded to pass-through: {e}")))
            }
        }
    }

    /// Store a record under `key`.
    ///
    /// The record is always kept in memory; a disk failure is returned so the
    /// caller can report it, but the entry stays usable.
    ///
    /// # Errors
    ///
    /// Returns the disk error if write-through failed.
    pub fn put(&self, key: CacheKey, record: Arc<FactRecord>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            record,
            created_at: Utc::now(),
        };
        let stored = match &self.disk {
            Some(disk) => disk.store(&entry),
            None => Ok(()),
        };
        self.remember(entry);
        let moved = self.set_latest(&key);
        let persisted = stored.and_then(|()| match &self.disk {
            Some(disk) if moved => disk.mark_current(&key),
            _ => Ok(()),
        });
        if persisted.is_err() {
            self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        }
        persisted
    }

    /// Drop the entry for `key` from memory and disk.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns the disk error if the persisted entry could not be deleted.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let in_memory = self
            .memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        {
            let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            if latest.get(&key.source_path) == Some(key) {
                latest.remove(&key.source_path);
            }
        }
        let on_disk = match &self.disk {
            Some(disk) => disk.remove(key)?,
            None => false,
        };
        debug!(key = %key, in_memory, on_disk, "Invalidated cache entry");
        Ok(in_memory || on_disk)
    }

    /// Live record for a source path, whatever its fingerprint: the one most
    /// recently stored or served.
    ///
    /// Used to keep previously known facts for files a run could not finish.
    #[must_use]
    pub fn latest_for_path(&self, source_path: &Path) -> Option<Arc<FactRecord>> {
        let key = self
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_path)
            .cloned();
        if let Some(key) = key {
            if let Some(entry) = self.read_memory().get(&key) {
                return Some(Arc::clone(&entry.record));
            }
        }

        let disk = self.disk.as_ref()?;
        match disk.latest_for_path(source_path) {
            Ok(Some(entry)) => {
                let record = Arc::clone(&entry.record);
                let key = entry.key.clone();
                self.remember(entry);
                self.set_latest(&key);
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(path = %source_path.display(), error = %e, "Cannot scan cache for prior record");
                None
            }
        }
    }

    /// Return the cached record for `key`, or run `extract` exactly once for
    /// all concurrent callers and cache its result.
    ///
    /// With `force_refresh`, the read path is skipped and the extractor always
    /// runs (or an extraction already running for the key is joined); the
    /// result is still written on success. Errors are shared with coalesced
    /// callers but never cached.
    pub fn get_or_extract<F>(&self, key: &CacheKey, force_refresh: bool, extract: F) -> Lookup
    where
        F: FnOnce() -> Result<FactRecord, AnalysisError>,
    {
        let mut early_warning = None;
        if !force_refresh {
            let (record, warning) = self.lookup(key);
            if let Some(record) = record {
                return Lookup {
                    outcome: Ok(record),
                    source: LookupSource::Cache,
                    warning,
                };
            }
            early_warning = warning;
        }

        let flight = self.flights.run(key, || {
            // A leader that lost the race to a just-finished flight finds its
            // entry here instead of extracting again.
            if !force_refresh {
                let cached = self.read_memory().get(key).map(|entry| Arc::clone(&entry.record));
                if let Some(record) = cached {
                    return (Ok(record), self.touch(key));
                }
            }
            self.extract_and_store(key, extract)
        });

        match flight {
            Flight::Led((outcome, warning)) => Lookup {
                outcome,
                source: LookupSource::Extracted,
                warning: warning.or(early_warning),
            },
            Flight::Joined(Some((outcome, warning))) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                Lookup {
                    outcome,
                    source: LookupSource::Coalesced,
                    warning: warning.or(early_warning),
                }
            }
            Flight::Joined(None) => Lookup {
                outcome: Err(AnalysisError::panicked(
                    key.source_path.clone(),
                    "extraction aborted before producing a result",
                )),
                source: LookupSource::Coalesced,
                warning: early_warning,
            },
        }
    }

    fn extract_and_store<F>(&self, key: &CacheKey, extract: F) -> (Shared, Option<String>)
    where
        F: FnOnce() -> Result<FactRecord, AnalysisError>,
    {
        self.counters.extractions.fetch_add(1, Ordering::Relaxed);
        let result = catch_unwind(AssertUnwindSafe(extract)).unwrap_or_else(|payload| {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                format!("extractor panicked: {s}")
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("extractor panicked: {s}")
            } else {
                "extractor panicked with unknown payload".to_string()
            };
            Err(AnalysisError::panicked(key.source_path.clone(), msg))
        });

        match result {
            Ok(record) => {
                let record = Arc::new(record);
                let warning = self.put(key.clone(), Arc::clone(&record)).err().map(|e| {
                    warn!(key = %key, error = %e, "Cache write failed, continuing without persistence");
                    format!("cache write degraded to pass-through: {e}")
                });
                (Ok(record), warning)
            }
            Err(e) => (Err(e), None),
        }
    }

    /// Delete superseded entries from the disk area and from memory.
    ///
    /// Returns the number of files removed from disk.
    ///
    /// # Errors
    ///
    /// Returns the disk error if the cache area cannot be scanned.
    pub fn prune(&self) -> Result<usize, CacheError> {
        {
            let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
            self.memory
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|key, _| latest.get(&key.source_path) == Some(key));
        }
        match &self.disk {
            Some(disk) => disk.prune(),
            None => Ok(0),
        }
    }

    /// Snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            extractions: self.counters.extractions.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            entries: self.read_memory().len(),
        }
    }

    /// Shut the cache down, returning its final counters.
    ///
    /// Every successful `put` has already been written through, so there is
    /// nothing left to flush.
    #[must_use]
    pub fn close(self) -> CacheStats {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            extractions = stats.extractions,
            coalesced = stats.coalesced,
            degraded = stats.degraded,
            in_flight = self.flights.in_flight(),
            "Closed fact cache"
        );
        stats
    }

    fn read_memory(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, entry: CacheEntry) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.key.clone(), entry);
    }

    /// Make `key` the live entry for its path. Returns whether that changed.
    fn set_latest(&self, key: &CacheKey) -> bool {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        if latest.get(&key.source_path) == Some(key) {
            return false;
        }
        latest.insert(key.source_path.clone(), key.clone());
        true
    }

    /// Record a hit on `key`, moving the persisted pointer if it changed.
    fn touch(&self, key: &CacheKey) -> Option<String> {
        if !self.set_latest(key) {
            return None;
        }
        let error = self.disk.as_ref()?.mark_current(key).err()?;
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        warn!(key = %key, error = %error, "Cannot record live cache entry");
        Some(format!("cache pointer update degraded to pass-through: {error}"))
    }
}
