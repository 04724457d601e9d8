//! Capabilities consumed from outside the engine.
//!
//! Per-file fact extraction and file discovery are provided by collaborators:
//! - **`Extractor`**: one implementation per [`ComponentKind`], turning a
//!   source file into a [`FactRecord`]
//! - **`FileDiscovery`**: walks a project root and partitions files by kind
//!
//! The engine only ever talks to these traits, so parsers for view templates,
//! controllers, mappers and procedures can live in their own crates.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AnalysisError, Result};
use crate::types::{ComponentKind, FactRecord, Fingerprint};

/// Turns one source file into a fact record.
///
/// Implementations must be deterministic for identical input and must not
/// have side effects beyond their return value. They are called from worker
/// threads and never while any engine lock is held.
pub trait Extractor: Send + Sync {
    /// The artifact kind this extractor understands.
    fn kind(&self) -> ComponentKind;

    /// Extract facts from `path`, observed with `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns an [`AnalysisError`] describing why the file could not be
    /// analyzed. The batch records it and carries on.
    fn extract(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<FactRecord, AnalysisError>;
}

/// Finds source files under a project root.
pub trait FileDiscovery {
    /// Partition the files under `root` by detected kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the root itself cannot be read.
    fn discover(&self, root: &Path) -> Result<DiscoveredFiles>;
}

/// File list partitioned by detected kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFiles {
    by_kind: BTreeMap<ComponentKind, Vec<PathBuf>>,
}

impl DiscoveredFiles {
    /// Create an empty file set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file of the given kind.
    pub fn push(&mut self, kind: ComponentKind, path: impl Into<PathBuf>) {
        self.by_kind.entry(kind).or_default().push(path.into());
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, kind: ComponentKind, path: impl Into<PathBuf>) -> Self {
        self.push(kind, path);
        self
    }

    /// Files of one kind, in insertion order.
    #[must_use]
    pub fn files(&self, kind: ComponentKind) -> &[PathBuf] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Every `(kind, path)` pair, kinds in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentKind, &Path)> {
        self.by_kind
            .iter()
            .flat_map(|(kind, paths)| paths.iter().map(move |p| (*kind, p.as_path())))
    }

    /// Total number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// Whether no files were discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(ComponentKind, PathBuf)> for DiscoveredFiles {
    fn from_iter<I: IntoIterator<Item = (ComponentKind, PathBuf)>>(iter: I) -> Self {
        let mut files = Self::new();
        for (kind, path) in iter {
            files.push(kind, path);
        }
        files
    }
}

/// Extractors by kind.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<ComponentKind, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.extractors.keys().collect();
        kinds.sort();
        f.debug_struct("ExtractorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ExtractorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor under its own kind, replacing any previous one.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, extractor: impl Extractor + 'static) -> Self {
        self.register(Arc::new(extractor));
        self
    }

    /// The extractor for `kind`, if one is registered.
    #[must_use]
    pub fn get(&self, kind: ComponentKind) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&kind).cloned()
    }

    /// Run the extractor for `kind` and normalize its output.
    ///
    /// # Errors
    ///
    /// `UnsupportedKind` if nothing is registered for `kind`, otherwise
    /// whatever the extractor or [`FactRecord::normalize`] reports.
    pub fn extract(
        &self,
        kind: ComponentKind,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<FactRecord, AnalysisError> {
        let extractor = self
            .get(kind)
            .ok_or_else(|| AnalysisError::unsupported_kind(path.to_path_buf(), kind))?;
        extractor
            .extract(path, fingerprint)?
            .normalize(kind, path, fingerprint)
    }
}
