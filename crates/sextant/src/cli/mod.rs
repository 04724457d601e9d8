//! CLI command implementations.

mod display;

pub mod chain;
pub mod cycles;
pub mod impact;
pub mod index;
pub mod prune;

use std::path::Path;

use sextant::sidecar::{SidecarDiscovery, SidecarExtractor};
use sextant::{BatchOptions, Config, ExtractorRegistry, Sextant};
use tracing::debug;

/// Open the workspace with its configuration and the sidecar extractors.
fn open(workspace: &Path) -> Result<Sextant, sextant::Error> {
    let config = Config::load_or_default(workspace)?;
    let extractors = SidecarExtractor::all()
        .fold(ExtractorRegistry::new(), |registry, extractor| {
            registry.with(extractor)
        });
    Sextant::open(workspace, config, extractors)
}

/// Open the workspace and bring its graph up to date.
///
/// The graph lives only in memory, so every query command indexes first;
/// unchanged files are served from the cache.
fn open_indexed(workspace: &Path) -> Result<Sextant, sextant::Error> {
    let sextant = open(workspace)?;
    let options = BatchOptions::from_config(sextant.config());
    let report = sextant.index_workspace(&SidecarDiscovery, &options)?;
    debug!(
        components = report.components.len(),
        errors = report.errors.len(),
        "Workspace indexed"
    );
    Ok(sextant)
}
