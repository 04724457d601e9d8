//! JSON sidecar fact files.
//!
//! External parsers that run out of process can hand their results to the
//! engine by writing one JSON document per analyzed artifact, named
//! `<anything>.<kind>.json` (for example `UserController.controller.json`):
//!
//! ```json
//! {
//!   "name": "UserController",
//!   "references": [
//!     { "target_name": "UserService", "target_kind_hint": "service", "edge_kind": "CALLS" }
//!   ],
//!   "attributes": { "package": "com.acme.web" }
//! }
//! ```
//!
//! [`SidecarDiscovery`] finds these files and [`SidecarExtractor`] reads them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::extract::{DiscoveredFiles, Extractor, FileDiscovery};
use crate::types::{Attributes, ComponentKind, FactRecord, Fingerprint, Reference};

const SIDECAR_EXTENSION: &str = "json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FactDocument {
    name: String,
    #[serde(default)]
    references: Vec<Reference>,
    #[serde(default)]
    attributes: Attributes,
}

/// Reads sidecar documents of one kind.
#[derive(Debug, Clone, Copy)]
pub struct SidecarExtractor {
    kind: ComponentKind,
}

impl SidecarExtractor {
    /// Extractor for documents of `kind`.
    #[must_use]
    pub fn new(kind: ComponentKind) -> Self {
        Self { kind }
    }

    /// One extractor per component kind.
    pub fn all() -> impl Iterator<Item = Self> {
        ComponentKind::ALL.into_iter().map(Self::new)
    }
}

impl Extractor for SidecarExtractor {
    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn extract(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<FactRecord, AnalysisError> {
        let content =
            fs::read(path).map_err(|e| AnalysisError::io_error(path.to_path_buf(), &e))?;
        let doc: FactDocument = serde_json::from_slice(&content)
            .map_err(|e| AnalysisError::extraction_failed(path.to_path_buf(), e.to_string()))?;

        Ok(FactRecord {
            kind: self.kind,
            name: doc.name,
            source_path: path.to_path_buf(),
            fingerprint: fingerprint.clone(),
            references: doc.references,
            attributes: doc.attributes,
        })
    }
}

/// Walks a directory tree for `*.<kind>.json` files.
///
/// Hidden directories and common build output directories are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarDiscovery;

impl SidecarDiscovery {
    /// Kind encoded in a sidecar file name, if it is one.
    #[must_use]
    pub fn kind_of(path: &Path) -> Option<ComponentKind> {
        if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXTENSION) {
            return None;
        }
        let stem = Path::new(path.file_stem()?);
        let kind = stem.extension()?.to_str()?;
        // `.json` alone or `.controller.json` with nothing before it are not sidecars.
        if stem.file_stem().is_none_or(|s| s.is_empty()) {
            return None;
        }
        ComponentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == kind)
    }

    fn walk_dir(dir: &Path, files: &mut Vec<(ComponentKind, PathBuf)>) {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    directory = %dir.display(),
                    error = %e,
                    "Cannot read directory, skipping"
                );
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(
                        directory = %dir.display(),
                        error = %e,
                        "Failed to read directory entry, skipping"
                    );
                    continue;
                }
            };

            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') || is_excluded_dir(name) {
                    continue;
                }
            }

            if path.is_dir() {
                Self::walk_dir(&path, files);
            } else if let Some(kind) = Self::kind_of(&path) {
                files.push((kind, path));
            }
        }
    }
}

impl FileDiscovery for SidecarDiscovery {
    fn discover(&self, root: &Path) -> Result<DiscoveredFiles> {
        // Fail on an unreadable root; nested directories only warn.
        let _entries = fs::read_dir(root)?;

        let mut found = Vec::new();
        Self::walk_dir(root, &mut found);
        found.sort_by(|a, b| a.1.cmp(&b.1));
        debug!(root = %root.display(), files = found.len(), "Discovered sidecar files");
        Ok(found.into_iter().collect())
    }
}

fn is_excluded_dir(name: &str) -> bool {
    matches!(
        name,
        "target" | "node_modules" | "vendor" | "bin" | "obj" | "build" | "dist"
    )
}
