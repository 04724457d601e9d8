//! Bounded-width batch analysis.
//!
//! The [`Orchestrator`] fans a discovered file set out over a fixed-size
//! worker pool. Each worker fingerprints its file, goes through the cache
//! (single-flight on a miss) and sends the outcome back over a channel. The
//! calling thread collects outcomes until every file has reported or the
//! deadline passes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator::run                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Calling Thread            │  Worker Pool (width N)             │
//! │  ───────────────           │  ─────────────────────             │
//! │  sort + cap tasks          │                                    │
//! │  spawn one job per file ───┼→ fingerprint                       │
//! │  recv_timeout(deadline)    │  cache.get_or_extract              │
//! │  ...                    ←──┼─ send outcome                      │
//! │  deadline: raise cancel    │  queued jobs see cancel, skip      │
//! │  sort everything by path   │                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Completion order is irrelevant: every list in the [`BatchReport`] is
//! sorted by source path before it is returned, so unchanged inputs yield
//! byte-identical reports.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::cache::{FactCache, LookupSource};
use crate::config::Config;
use crate::error::{AnalysisError, Error, Result};
use crate::extract::{DiscoveredFiles, ExtractorRegistry};
use crate::fingerprint::{FingerprintMode, fingerprint_file};
use crate::types::{CacheKey, ComponentKind, FactRecord};

/// Options for one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Worker-pool width.
    pub workers: usize,
    /// Stop collecting results after this long.
    pub deadline: Option<Duration>,
    /// Analyze at most this many files (in path order); the rest are cancelled.
    pub max_files: Option<usize>,
    /// Ignore cached records and re-run every extractor.
    pub force_refresh: bool,
    /// How file fingerprints are derived.
    pub fingerprint: FingerprintMode,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BatchOptions {
    /// Options derived from a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.workers,
            deadline: config.deadline_ms.map(Duration::from_millis),
            max_files: config.max_files,
            force_refresh: false,
            fingerprint: config.fingerprint,
        }
    }

    /// Builder-style `force_refresh`.
    #[must_use]
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Counters for one run. Not part of the serialized report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Distinct files in the input.
    pub files_total: usize,
    /// Files answered from the cache.
    pub cache_hits: usize,
    /// Files this run extracted.
    pub extracted: usize,
    /// Files that shared an extraction already in flight.
    pub coalesced: usize,
    /// Wall-clock time of the run.
    pub duration: Duration,
    /// Whether the graph snapshot was rebuilt afterwards.
    pub graph_rebuilt: bool,
}

/// Aggregate result of a batch.
///
/// All lists are sorted by source path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// `false` only when files were attempted and every one of them failed.
    pub success: bool,
    /// Records of files analyzed in this run.
    pub components: Vec<Arc<FactRecord>>,
    /// Per-file failures.
    pub errors: Vec<AnalysisError>,
    /// Files not finished before the deadline or beyond the file cap.
    pub cancelled: Vec<PathBuf>,
    /// Previously cached records of cancelled files, still used for the graph.
    pub carried_over: Vec<Arc<FactRecord>>,
    /// Degraded operation and graph-build warnings.
    pub warnings: Vec<String>,
    /// Run counters.
    #[serde(skip)]
    pub stats: BatchStats,
}

impl BatchReport {
    /// Records that feed the graph: this run's components plus carried-over
    /// records, in source path order.
    #[must_use]
    pub fn graph_input(&self) -> Vec<Arc<FactRecord>> {
        let mut records: Vec<_> = self
            .components
            .iter()
            .chain(&self.carried_over)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        records
    }
}

/// Outcome of one file, sent from a worker.
#[derive(Debug)]
pub(crate) struct FileOutcome {
    pub(crate) path: PathBuf,
    pub(crate) result: std::result::Result<Arc<FactRecord>, AnalysisError>,
    pub(crate) source: Option<LookupSource>,
    pub(crate) warning: Option<String>,
}

/// Runs batches against a shared cache and extractor registry.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    cache: Arc<FactCache>,
    extractors: Arc<ExtractorRegistry>,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(cache: Arc<FactCache>, extractors: Arc<ExtractorRegistry>) -> Self {
        Self { cache, extractors }
    }

    /// The registry workers extract with.
    #[must_use]
    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    /// Analyze `files`.
    ///
    /// Per-file problems end up in the report; they never fail the call.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a zero worker count and
    /// `Error::Internal` if the worker pool cannot be started.
    pub fn run(&self, files: &DiscoveredFiles, options: &BatchOptions) -> Result<BatchReport> {
        let started = Instant::now();
        if options.workers == 0 {
            return Err(Error::validation("workers", "must be at least 1"));
        }

        let mut report = BatchReport::default();
        let mut tasks = plan(files, &mut report.warnings);
        report.stats.files_total = tasks.len();

        let mut cancelled: Vec<PathBuf> = Vec::new();
        if let Some(cap) = options.max_files {
            if tasks.len() > cap {
                cancelled.extend(tasks.drain(cap..).map(|(_, path)| path));
                report
                    .warnings
                    .push(format!("file cap of {cap} reached; {} files not analyzed", cancelled.len()));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("sextant-worker-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("cannot start worker pool: {e}")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<FileOutcome>();
        let mut pending: HashSet<PathBuf> = HashSet::with_capacity(tasks.len());
        for (kind, path) in tasks {
            pending.insert(path.clone());
            let tx = tx.clone();
            let stop = Arc::clone(&stop);
            let cache = Arc::clone(&self.cache);
            let extractors = Arc::clone(&self.extractors);
            let mode = options.fingerprint;
            let force = options.force_refresh;
            pool.spawn(move || {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    analyze_file(&cache, &extractors, kind, &path, mode, force)
                }))
                .unwrap_or_else(|_| {
                    error!(path = %path.display(), "Worker panicked outside the extractor");
                    FileOutcome {
                        path: path.clone(),
                        result: Err(AnalysisError::panicked(path.clone(), "worker panicked")),
                        source: None,
                        warning: None,
                    }
                });
                // The receiver is gone once the deadline has passed.
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let deadline = options.deadline.map(|d| started + d);
        while !pending.is_empty() {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(remaining)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(outcome) => {
                    pending.remove(&outcome.path);
                    record(&mut report, outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    stop.store(true, Ordering::Relaxed);
                    warn!(
                        unfinished = pending.len(),
                        "Batch deadline passed, cancelling remaining files"
                    );
                    report.warnings.push(format!(
                        "deadline passed; {} files not finished",
                        pending.len()
                    ));
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Every job ran; anything still pending was skipped.
                    break;
                }
            }
        }
        cancelled.extend(pending);

        for path in &cancelled {
            if let Some(prior) = self.cache.latest_for_path(path) {
                trace!(path = %path.display(), "Carrying over prior record");
                report.carried_over.push(prior);
            }
        }
        report.cancelled = cancelled;
        finish(&mut report);
        report.stats.duration = started.elapsed();

        info!(
            files = report.stats.files_total,
            analyzed = report.components.len(),
            failed = report.errors.len(),
            cancelled = report.cancelled.len(),
            cache_hits = report.stats.cache_hits,
            extracted = report.stats.extracted,
            duration_ms = report.stats.duration.as_millis(),
            "Batch finished"
        );
        Ok(report)
    }
}

/// Flatten the input into `(kind, path)` tasks in path order, dropping
/// paths listed under more than one kind.
fn plan(files: &DiscoveredFiles, warnings: &mut Vec<String>) -> Vec<(ComponentKind, PathBuf)> {
    let mut seen: HashSet<&Path> = HashSet::with_capacity(files.len());
    let mut tasks = Vec::with_capacity(files.len());
    for (kind, path) in files.iter() {
        if seen.insert(path) {
            tasks.push((kind, path.to_path_buf()));
        } else {
            warn!(path = %path.display(), %kind, "File listed under several kinds, keeping the first");
            warnings.push(format!(
                "{} listed under several kinds; analyzed once",
                path.display()
            ));
        }
    }
    tasks.sort_by(|a, b| a.1.cmp(&b.1));
    tasks
}

/// Fingerprint a file and fetch or extract its record.
pub(crate) fn analyze_file(
    cache: &FactCache,
    extractors: &ExtractorRegistry,
    kind: ComponentKind,
    path: &Path,
    mode: FingerprintMode,
    force_refresh: bool,
) -> FileOutcome {
    let fingerprint = match fingerprint_file(path, mode) {
        Ok(fp) => fp,
        Err(e) => {
            return FileOutcome {
                path: path.to_path_buf(),
                result: Err(AnalysisError::io_error(path.to_path_buf(), &e)),
                source: None,
                warning: None,
            };
        }
    };
    let key = CacheKey::new(path, fingerprint);
    let lookup = cache.get_or_extract(&key, force_refresh, || {
        extractors.extract(kind, path, &key.fingerprint)
    });
    FileOutcome {
        path: path.to_path_buf(),
        result: lookup.outcome,
        source: Some(lookup.source),
        warning: lookup.warning,
    }
}

fn record(report: &mut BatchReport, outcome: FileOutcome) {
    match outcome.source {
        Some(LookupSource::Cache) => report.stats.cache_hits += 1,
        Some(LookupSource::Extracted) => report.stats.extracted += 1,
        Some(LookupSource::Coalesced) => report.stats.coalesced += 1,
        None => {}
    }
    if let Some(warning) = outcome.warning {
        report.warnings.push(format!("{}: {warning}", outcome.path.display()));
    }
    match outcome.result {
        Ok(record) => report.components.push(record),
        Err(e) => {
            debug!(path = %e.path.display(), kind = %e.kind, error = %e.message, "File failed");
            report.errors.push(e);
        }
    }
}

fn finish(report: &mut BatchReport) {
    report
        .components
        .sort_by(|a, b| a.source_path.cmp(&b.source_path));
    report.errors.sort_by(|a, b| a.path.cmp(&b.path));
    report.cancelled.sort();
    report
        .carried_over
        .sort_by(|a, b| a.source_path.cmp(&b.source_path));
    report.warnings.sort();

    let attempted = report.components.len() + report.errors.len();
    report.success = attempted == 0 || !report.components.is_empty();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractor;
    use crate::types::{EdgeKind, Fingerprint};
    use std::fs;

    /// Names the record after the file stem; fails for stems starting with "bad".
    struct StemExtractor;

    impl Extractor for StemExtractor {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Service
        }

        fn extract(
            &self,
            path: &Path,
            fingerprint: &Fingerprint,
        ) -> std::result::Result<FactRecord, AnalysisError> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem.starts_with("bad") {
                return Err(AnalysisError::extraction_failed(path.to_path_buf(), "cannot parse"));
            }
            Ok(FactRecord::new(ComponentKind::Service, stem, path, fingerprint.clone())
                .with_reference("Shared", None, EdgeKind::Calls))
        }
    }

    fn workspace(names: &[&str]) -> (tempfile::TempDir, DiscoveredFiles) {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut files = DiscoveredFiles::new();
        for name in names {
            let path = dir.path().join(name);
            fs::write(&path, name).expect("write");
            files.push(ComponentKind::Service, path);
        }
        (dir, files)
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(FactCache::in_memory()),
            Arc::new(ExtractorRegistry::new().with(StemExtractor)),
        )
    }

    #[test]
    fn failures_are_reported_alongside_successes() {
        let (_dir, files) = workspace(&["Zeta.java", "bad1.java", "Alpha.java", "bad2.java"]);

        let report = orchestrator().run(&files, &BatchOptions::default()).expect("run");

        assert!(report.success);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.components.len(), 2);
        let names: Vec<_> = report.components.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn all_failures_mark_batch_unsuccessful() {
        let (_dir, files) = workspace(&["bad1.java", "bad2.java"]);

        let report = orchestrator().run(&files, &BatchOptions::default()).expect("run");

        assert!(!report.success);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let (_dir, files) = workspace(&["A.java", "B.java"]);
        let orchestrator = orchestrator();

        let first = orchestrator.run(&files, &BatchOptions::default()).expect("run");
        let second = orchestrator.run(&files, &BatchOptions::default()).expect("run");
        let forced = orchestrator
            .run(&files, &BatchOptions::default().force_refresh(true))
            .expect("run");

        assert_eq!(first.stats.extracted, 2);
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.stats.extracted, 0);
        assert_eq!(forced.stats.extracted, 2);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let (dir, mut files) = workspace(&["A.java"]);
        files.push(ComponentKind::Service, dir.path().join("gone.java"));

        let report = orchestrator().run(&files, &BatchOptions::default()).expect("run");

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, crate::error::AnalysisErrorKind::Io);
    }

    #[test]
    fn file_cap_cancels_the_tail_in_path_order() {
        let (_dir, files) = workspace(&["C.java", "A.java", "B.java"]);
        let options = BatchOptions {
            max_files: Some(2),
            ..BatchOptions::default()
        };

        let report = orchestrator().run(&files, &options).expect("run");

        assert_eq!(report.components.len(), 2);
        assert_eq!(report.cancelled.len(), 1);
        assert!(report.cancelled[0].ends_with("C.java"));
        assert!(report.warnings.iter().any(|w| w.contains("file cap")));
    }

    #[test]
    fn duplicate_path_is_analyzed_once() {
        let (dir, mut files) = workspace(&["A.java"]);
        files.push(ComponentKind::Controller, dir.path().join("A.java"));

        let report = orchestrator().run(&files, &BatchOptions::default()).expect("run");

        assert_eq!(report.stats.files_total, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let options = BatchOptions {
            workers: 0,
            ..BatchOptions::default()
        };
        assert!(matches!(
            orchestrator().run(&DiscoveredFiles::new(), &options),
            Err(Error::Validation { parameter: "workers", .. })
        ));
    }

    #[test]
    fn empty_batch_succeeds() {
        let report = orchestrator()
            .run(&DiscoveredFiles::new(), &BatchOptions::default())
            .expect("run");
        assert!(report.success);
        assert!(report.components.is_empty());
    }
}
