//! On-disk cache area.
//!
//! One JSON file per cache key, laid out as
//! `<root>/<aa>/<path-digest>/<fingerprint>.json` where `path-digest` is the
//! SHA-256 of the source path and `aa` its first two hex digits. Grouping by
//! path lets the cache find the live record for a file without an index:
//! each path directory holds a `current` file naming the fingerprint that was
//! stored or served last. Directories without one fall back to the newest
//! entry by creation time.
//!
//! Writes use the temp-file-then-rename pattern: the entry is written to
//! `<fingerprint>.json.tmp`, flushed, then renamed over the target, so a
//! reader never observes a partially written entry.

use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheEntry;
use crate::error::CacheError;
use crate::fingerprint::digest_hex;
use crate::types::{CacheKey, Fingerprint};

/// Version of the entry file format. Entries with another version are ignored.
const ENTRY_FORMAT: u32 = 1;

const ENTRY_EXTENSION: &str = "json";

const CURRENT_POINTER: &str = "current";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    format: u32,
    #[serde(flatten)]
    entry: CacheEntry,
}

/// Cache files under a root directory.
#[derive(Debug)]
pub(crate) struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (and create if needed) the cache area.
    pub(crate) fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        Ok(Self { root })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn path_dir(&self, source_path: &Path) -> PathBuf {
        let digest = digest_hex(source_path.as_os_str().as_encoded_bytes());
        self.root.join(&digest[..2]).join(digest)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.path_dir(&key.source_path)
            .join(format!("{}.{ENTRY_EXTENSION}", key.fingerprint))
    }

    #[cfg(test)]
    pub(crate) fn entry_path_for_test(&self, key: &CacheKey) -> PathBuf {
        self.entry_path(key)
    }

    /// Load the entry for `key`, if one was persisted.
    pub(crate) fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let Some(entry) = read_entry(&path)? else {
            return Ok(None);
        };
        if entry.key != *key {
            return Err(CacheError::Corrupt {
                path,
                reason: format!("entry belongs to {}", entry.key),
            });
        }
        Ok(Some(entry))
    }

    /// Persist an entry atomically.
    pub(crate) fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let target = self.entry_path(&entry.key);
        let dir = self.path_dir(&entry.key.source_path);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let bytes = serde_json::to_vec(&StoredEntry {
            format: ENTRY_FORMAT,
            entry: entry.clone(),
        })?;

        write_atomic(&target, &bytes)
    }

    /// Record `key` as the live entry for its source path.
    pub(crate) fn mark_current(&self, key: &CacheKey) -> Result<(), CacheError> {
        let dir = self.path_dir(&key.source_path);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        write_atomic(&dir.join(CURRENT_POINTER), key.fingerprint.as_str().as_bytes())
    }

    fn current_in(dir: &Path) -> Result<Option<Fingerprint>, CacheError> {
        let path = dir.join(CURRENT_POINTER);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| Fingerprint::new(text)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Delete the entry for `key`. Returns whether a file was removed.
    ///
    /// The path's `current` pointer goes with it when it names `key`.
    pub(crate) fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let dir = self.path_dir(&key.source_path);
        if Self::current_in(&dir)?.as_ref() == Some(&key.fingerprint) {
            let pointer = dir.join(CURRENT_POINTER);
            match fs::remove_file(&pointer) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(pointer, e)),
            }
        }

        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Live persisted entry for a source path.
    pub(crate) fn latest_for_path(
        &self,
        source_path: &Path,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let dir = self.path_dir(source_path);
        let entries = self
            .entries_in(&dir)?
            .into_iter()
            .filter(|entry| entry.key.source_path == source_path)
            .collect();
        let (live, _) = split_live(entries, Self::current_in(&dir)?.as_ref());
        Ok(live)
    }

    /// Delete every entry except the live one per source path and every
    /// leftover temp file. Returns the number of files removed.
    pub(crate) fn prune(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for bucket in list_dir(&self.root)? {
            if !bucket.is_dir() {
                continue;
            }
            for path_dir in list_dir(&bucket)? {
                if !path_dir.is_dir() {
                    continue;
                }
                removed += remove_temp_files(&path_dir)?;
                let entries = self.entries_in(&path_dir)?;
                let (_, superseded) = split_live(entries, Self::current_in(&path_dir)?.as_ref());
                for stale in &superseded {
                    if self.remove(&stale.key)? {
                        removed += 1;
                    }
                }
            }
        }
        debug!(root = %self.root.display(), removed, "Pruned cache area");
        Ok(removed)
    }

    /// Read every valid entry in one path directory, skipping corrupt files.
    fn entries_in(&self, dir: &Path) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        for file in list_dir(dir)? {
            if file.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match read_entry(&file) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(file = %file.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(entries)
    }
}

/// Separate the live entry from the superseded ones. The entry named by
/// `current` wins; otherwise the newest by creation time.
fn split_live(
    mut entries: Vec<CacheEntry>,
    current: Option<&Fingerprint>,
) -> (Option<CacheEntry>, Vec<CacheEntry>) {
    let position = current
        .and_then(|fp| entries.iter().position(|e| e.key.fingerprint == *fp))
        .or_else(|| {
            entries
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.key.fingerprint.cmp(&b.key.fingerprint))
                })
                .map(|(i, _)| i)
        });
    let live = position.map(|i| entries.swap_remove(i));
    (live, entries)
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let temp = make_temp_path(target);
    if let Err(e) = write_synced(&temp, bytes) {
        // Best-effort cleanup of temp file
        let _ = fs::remove_file(&temp);
        return Err(CacheError::io(&temp, e));
    }
    fs::rename(&temp, target).map_err(|e| CacheError::io(target, e))
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    let stored: StoredEntry = serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if stored.format != ENTRY_FORMAT {
        debug!(file = %path.display(), format = stored.format, "Ignoring cache entry of other format");
        return Ok(None);
    }
    Ok(Some(stored.entry))
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn remove_temp_files(dir: &Path) -> Result<usize, CacheError> {
    let mut removed = 0;
    for file in list_dir(dir)? {
        if file.extension().and_then(|e| e.to_str()) == Some("tmp") {
            fs::remove_file(&file).map_err(|e| CacheError::io(&file, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Creates a temporary file path for atomic write operations.
///
/// Appends `.tmp` to the existing extension (`a.json` -> `a.json.tmp`).
fn make_temp_path(path: &Path) -> PathBuf {
    let mut temp_path = path.to_path_buf();
    let new_extension = match path.extension() {
        Some(ext) => {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".tmp");
            new_ext
        }
        None => std::ffi::OsString::from("tmp"),
    };
    temp_path.set_extension(new_extension);
    temp_path
}
