//! # Sextant: Dependency Index for Layered Web Codebases
//!
//! Sextant turns per-file structural facts (views, controllers, services,
//! mappers, tables, procedures) into a typed dependency graph and answers two
//! kinds of questions over it: which call chains connect two components, and
//! what is the blast radius of changing one.
//!
//! ## Design Philosophy
//!
//! - **Facts in, graph out** - Parsing is delegated to [`Extractor`]s; sextant
//!   caches their output and resolves it into a graph
//! - **Content addressed** - A file is re-extracted only when its fingerprint changes
//! - **Best effort** - A file that cannot be analyzed is reported, never fatal
//! - **Snapshot isolation** - Queries run against an immutable [`GraphStore`];
//!   a rebuild swaps in a new snapshot instead of editing the old one
//! - **Deterministic** - Same inputs, same report, same query answers
//!
//! ## Quick Start
//!
//! ```no_run
//! use sextant::{BatchOptions, ChainRequest, Config, ExtractorRegistry, ImpactRequest, Sextant};
//! use sextant::sidecar::{SidecarDiscovery, SidecarExtractor};
//! use std::path::Path;
//!
//! let mut extractors = ExtractorRegistry::new();
//! for extractor in SidecarExtractor::all() {
//!     extractors = extractors.with(extractor);
//! }
//! let sextant = Sextant::open(Path::new("/path/to/workspace"), Config::default(), extractors)?;
//!
//! let report = sextant.index_workspace(&SidecarDiscovery, &BatchOptions::default())?;
//! println!("{} components, {} errors", report.components.len(), report.errors.len());
//!
//! let chains = sextant.find_chain(&ChainRequest::between("UserController", "UserMapper"))?;
//! let impact = sextant.impact(&ImpactRequest::new("UserService"))?;
//! println!("{} chains, {} upstream", chains.total_chains, impact.total_upstream);
//! # Ok::<(), sextant::Error>(())
//! ```

pub mod cache;
pub mod config;
mod error;
pub mod extract;
pub mod fingerprint;
pub mod graph;
pub mod orchestrator;
pub mod query;
pub mod sidecar;
mod types;

pub use cache::{CacheStats, FactCache};
pub use config::Config;
pub use error::{AnalysisError, AnalysisErrorKind, CacheError, Error, Result};
pub use extract::{DiscoveredFiles, Extractor, ExtractorRegistry, FileDiscovery};
pub use graph::{BuildWarning, Cycle, GraphStore};
pub use orchestrator::{BatchOptions, BatchReport, BatchStats, Orchestrator};
pub use query::{
    Chain, ChainFinder, ChainRequest, ChainResult, Direction, ImpactAnalyzer, ImpactRequest,
    ImpactResult,
};
pub use types::{
    Attributes, CacheKey, ComponentKind, EdgeKind, FactRecord, Fingerprint, NodeKind, Reference,
};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

/// Dependency index over one workspace.
///
/// Owns the fact cache, the extractor registry and the current graph
/// snapshot. Every method takes `&self`; indexing and queries may run
/// concurrently from several threads.
pub struct Sextant {
    workspace_root: PathBuf,
    config: Config,
    cache: Arc<FactCache>,
    orchestrator: Orchestrator,
    graph: RwLock<Option<Arc<GraphStore>>>,
    /// Keys of the records the current snapshot was built from.
    last_build: Mutex<Option<BTreeSet<CacheKey>>>,
}

impl std::fmt::Debug for Sextant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sextant")
            .field("workspace_root", &self.workspace_root)
            .field("cache_root", &self.cache.root())
            .finish_non_exhaustive()
    }
}

impl Sextant {
    /// Open a workspace with the given configuration and extractors.
    ///
    /// With `persist_cache`, the on-disk cache area under `cache_dir` is
    /// created if needed and entries from earlier runs are loaded lazily.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration, an I/O error if
    /// the workspace root does not exist, or `Error::Cache` if the cache
    /// directory cannot be created.
    pub fn open(workspace_root: &Path, config: Config, extractors: ExtractorRegistry) -> Result<Self> {
        config.validate()?;
        let workspace_root = workspace_root.canonicalize().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("workspace root not found: {}", workspace_root.display()),
            ))
        })?;

        let cache = if config.persist_cache {
            FactCache::open(config.cache_dir_in(&workspace_root))?
        } else {
            FactCache::in_memory()
        };
        debug!(workspace = %workspace_root.display(), persist = config.persist_cache, "Opened workspace");
        Ok(Self::assemble(workspace_root, config, Arc::new(cache), extractors))
    }

    /// An index with a memory-only cache and default configuration.
    ///
    /// Paths handed to [`Sextant::index`] are used as given.
    #[must_use]
    pub fn in_memory(extractors: ExtractorRegistry) -> Self {
        let config = Config {
            persist_cache: false,
            ..Config::default()
        };
        Self::assemble(PathBuf::from("."), config, Arc::new(FactCache::in_memory()), extractors)
    }

    fn assemble(
        workspace_root: PathBuf,
        config: Config,
        cache: Arc<FactCache>,
        extractors: ExtractorRegistry,
    ) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&cache), Arc::new(extractors));
        Self {
            workspace_root,
            config,
            cache,
            orchestrator,
            graph: RwLock::new(None),
            last_build: Mutex::new(None),
        }
    }

    /// The workspace root (canonicalized).
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The fact cache.
    #[must_use]
    pub fn cache(&self) -> &FactCache {
        &self.cache
    }

    // === Indexing ===

    /// Discover files under the workspace root and index them.
    ///
    /// # Errors
    ///
    /// Whatever discovery reports, or see [`Sextant::index`].
    pub fn index_workspace(
        &self,
        discovery: &dyn FileDiscovery,
        options: &BatchOptions,
    ) -> Result<BatchReport> {
        let files = discovery.discover(&self.workspace_root)?;
        self.index(&files, options)
    }

    /// Analyze `files` and rebuild the graph if the set of records feeding it
    /// changed.
    ///
    /// The report carries per-file errors, cancelled files, degraded cache
    /// operations and the warnings of the snapshot now in use.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run`].
    pub fn index(&self, files: &DiscoveredFiles, options: &BatchOptions) -> Result<BatchReport> {
        let mut report = self.orchestrator.run(files, options)?;
        let records = report.graph_input();
        let (snapshot, rebuilt) = self.install(&records);

        report.stats.graph_rebuilt = rebuilt;
        report
            .warnings
            .extend(snapshot.warnings().iter().map(ToString::to_string));
        if !report.success {
            warn!(errors = report.errors.len(), "Every analyzed file failed");
        }
        Ok(report)
    }

    /// Replace the snapshot with one built from `records`, unconditionally.
    pub fn rebuild_from(&self, records: &[Arc<FactRecord>]) -> Arc<GraphStore> {
        let mut last_build = self
            .last_build
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(GraphStore::build(records.iter().map(AsRef::as_ref)));
        *last_build = Some(records.iter().map(|r| r.cache_key()).collect());
        self.swap(Arc::clone(&snapshot));
        snapshot
    }

    fn install(&self, records: &[Arc<FactRecord>]) -> (Arc<GraphStore>, bool) {
        let mut last_build = self
            .last_build
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let keys: BTreeSet<CacheKey> = records.iter().map(|r| r.cache_key()).collect();

        if last_build.as_ref() == Some(&keys) {
            if let Some(current) = self.current() {
                debug!(records = records.len(), "Fact set unchanged, keeping graph snapshot");
                return (current, false);
            }
        }

        let snapshot = Arc::new(GraphStore::build(records.iter().map(AsRef::as_ref)));
        *last_build = Some(keys);
        self.swap(Arc::clone(&snapshot));
        let stats = snapshot.stats();
        info!(
            nodes = stats.nodes,
            links = stats.links,
            cycles = stats.cycles,
            "Graph snapshot rebuilt"
        );
        (snapshot, true)
    }

    fn swap(&self, snapshot: Arc<GraphStore>) {
        *self.graph.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn current(&self) -> Option<Arc<GraphStore>> {
        self.graph
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Analyze one file through the cache, as a batch worker would.
    ///
    /// Does not touch the graph snapshot.
    ///
    /// # Errors
    ///
    /// The file's [`AnalysisError`] if it cannot be fingerprinted or extracted.
    pub fn analyze_file(
        &self,
        path: &Path,
        kind: ComponentKind,
        force_refresh: bool,
    ) -> std::result::Result<Arc<FactRecord>, AnalysisError> {
        let outcome = orchestrator::analyze_file(
            &self.cache,
            self.orchestrator.extractors(),
            kind,
            path,
            self.config.fingerprint,
            force_refresh,
        );
        if let Some(warning) = outcome.warning {
            warn!(path = %path.display(), "{warning}");
        }
        outcome.result
    }

    // === Queries ===

    /// The graph snapshot queries currently run against.
    ///
    /// # Errors
    ///
    /// Returns `Error::Graph` if nothing has been indexed yet.
    pub fn snapshot(&self) -> Result<Arc<GraphStore>> {
        self.current()
            .ok_or_else(|| Error::Graph("no graph has been built; run an index first".to_string()))
    }

    /// Enumerate call chains. Omitted bounds come from the configuration.
    ///
    /// # Errors
    ///
    /// See [`ChainFinder::find`]; `Error::Graph` before the first index.
    pub fn find_chain(&self, request: &ChainRequest) -> Result<ChainResult> {
        let snapshot = self.snapshot()?;
        ChainFinder::new(&snapshot).run(request, self.config.chain)
    }

    /// Leveled impact analysis. Omitted parameters come from the configuration.
    ///
    /// # Errors
    ///
    /// See [`ImpactAnalyzer::analyze`]; `Error::Graph` before the first index.
    pub fn impact(&self, request: &ImpactRequest) -> Result<ImpactResult> {
        let snapshot = self.snapshot()?;
        ImpactAnalyzer::new(&snapshot).run(request, self.config.impact)
    }

    /// Cycles found in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Graph` before the first index.
    pub fn cycles(&self) -> Result<Vec<Cycle>> {
        Ok(self.snapshot()?.cycles().to_vec())
    }

    // === Lifecycle ===

    /// Release the index, returning the cache's final counters.
    #[must_use]
    pub fn shutdown(self) -> CacheStats {
        let Self {
            cache,
            orchestrator,
            ..
        } = self;
        drop(orchestrator);
        match Arc::try_unwrap(cache) {
            Ok(cache) => cache.close(),
            // A worker from a timed-out batch still holds the cache.
            Err(shared) => shared.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_before_index_are_graph_errors() {
        let sextant = Sextant::in_memory(ExtractorRegistry::new());

        assert!(matches!(
            sextant.find_chain(&ChainRequest::neighbors("X")),
            Err(Error::Graph(_))
        ));
        assert!(matches!(
            sextant.impact(&ImpactRequest::new("X")),
            Err(Error::Graph(_))
        ));
        assert!(matches!(sextant.cycles(), Err(Error::Graph(_))));
    }

    #[test]
    fn rebuild_swaps_snapshot_without_touching_old_one() {
        let sextant = Sextant::in_memory(ExtractorRegistry::new());
        let a = Arc::new(
            FactRecord::new(ComponentKind::Service, "A", "a", Fingerprint::new("1"))
                .with_reference("B", None, EdgeKind::Calls),
        );
        let old = sextant.rebuild_from(&[Arc::clone(&a)]);

        let b = Arc::new(FactRecord::new(ComponentKind::Service, "C", "c", Fingerprint::new("1")));
        let new = sextant.rebuild_from(&[a, b]);

        assert_eq!(old.stats().nodes, 2);
        assert_eq!(new.stats().nodes, 3);
        assert!(Arc::ptr_eq(&sextant.snapshot().expect("snapshot"), &new));
    }

    #[test]
    fn open_rejects_missing_workspace() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("nope");

        let err = Sextant::open(&missing, Config::default(), ExtractorRegistry::new())
            .expect_err("missing root");
        assert!(err.to_string().contains("workspace root not found"));
    }
}
