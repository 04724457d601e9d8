//! File fingerprints used as cache keys.
//!
//! A fingerprint is a SHA-256 digest over the file path plus either its
//! metadata (size and modification time) or its full content. Identical
//! fingerprints mean an earlier analysis can be reused without calling the
//! extractor again.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Fingerprint;

/// How fingerprints are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Path, size and modification time. Cheap; one `stat` per file.
    #[default]
    Metadata,
    /// Path and a hash of the full content. Survives `touch`, costs a read.
    Content,
}

/// Compute the fingerprint of a file on disk.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be stat'ed or read.
pub fn fingerprint_file(path: &Path, mode: FingerprintMode) -> std::io::Result<Fingerprint> {
    match mode {
        FingerprintMode::Metadata => {
            let metadata = fs::metadata(path)?;
            #[allow(clippy::cast_possible_truncation)] // Nanoseconds fit in i64 for centuries
            let mtime_ns = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos() as i64);
            Ok(from_metadata(path, metadata.len(), mtime_ns))
        }
        FingerprintMode::Content => {
            let content = fs::read(path)?;
            Ok(from_content(path, &content))
        }
    }
}

/// Fingerprint from path, size and modification time.
#[must_use]
pub fn from_metadata(path: &Path, size_bytes: u64, mtime_ns: i64) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"meta\0");
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(b"\0");
    hasher.update(size_bytes.to_le_bytes());
    hasher.update(mtime_ns.to_le_bytes());
    Fingerprint::new(to_hex(&hasher.finalize()))
}

/// Fingerprint from path and file content.
#[must_use]
pub fn from_content(path: &Path, content: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"content\0");
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(b"\0");
    hasher.update(content);
    Fingerprint::new(to_hex(&hasher.finalize()))
}

/// SHA-256 of an arbitrary string, hex encoded. Used for cache directory names.
pub(crate) fn digest_hex(input: &[u8]) -> String {
    to_hex(&Sha256::digest(input))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_fingerprint_changes_with_size_and_mtime() {
        let path = Path::new("web/user/list.jsp");
        let base = from_metadata(path, 100, 1_000);

        assert_eq!(base, from_metadata(path, 100, 1_000));
        assert_ne!(base, from_metadata(path, 101, 1_000));
        assert_ne!(base, from_metadata(path, 100, 1_001));
        assert_ne!(base, from_metadata(Path::new("web/user/edit.jsp"), 100, 1_000));
    }

    #[test]
    fn content_and_metadata_modes_never_collide() {
        let path = Path::new("a");
        assert_ne!(from_content(path, b""), from_metadata(path, 0, 0));
    }

    #[test]
    fn fingerprints_are_lowercase_hex_sha256() {
        let fp = from_content(Path::new("x"), b"select 1");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_file_reads_disk_state() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("UserMapper.xml");
        fs::write(&file, "<mapper/>").expect("write");

        let first = fingerprint_file(&file, FingerprintMode::Content).expect("fingerprint");
        fs::write(&file, "<mapper namespace=\"x\"/>").expect("rewrite");
        let second = fingerprint_file(&file, FingerprintMode::Content).expect("fingerprint");

        assert_ne!(first, second);
        assert!(fingerprint_file(&dir.path().join("missing"), FingerprintMode::Metadata).is_err());
    }
}
