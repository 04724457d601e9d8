//! `sextant index` command implementation.

use std::path::Path;

use colored::Colorize;
use sextant::BatchOptions;
use sextant::sidecar::SidecarDiscovery;

use super::display::{print_json, print_notes};

/// Run the index command.
pub fn run(workspace: &Path, force: bool, json: bool) -> Result<(), sextant::Error> {
    if !json {
        println!("{} {}...", "Indexing".cyan().bold(), workspace.display());
    }

    let sextant = super::open(workspace)?;
    let options = BatchOptions::from_config(sextant.config()).force_refresh(force);
    if force && !json {
        println!("{}", "Ignoring cached facts".yellow());
    }
    let report = sextant.index_workspace(&SidecarDiscovery, &options)?;
    let graph = sextant.snapshot()?.stats();

    if json {
        return print_json(&report);
    }

    println!();
    println!(
        "{} {} files: {} components, {} cached, {} extracted",
        "Indexed".green().bold(),
        report.stats.files_total,
        report.components.len(),
        report.stats.cache_hits,
        report.stats.extracted
    );
    println!(
        "{}: {} nodes ({} unresolved), {} links, {} cycles",
        "Graph".white().bold(),
        graph.nodes,
        graph.unresolved,
        graph.links,
        graph.cycles
    );
    println!("{}: {:.2?}", "Duration".dimmed(), report.stats.duration);

    if !report.cancelled.is_empty() {
        println!(
            "{}: {} files ({} carried over from earlier runs)",
            "Cancelled".yellow(),
            report.cancelled.len(),
            report.carried_over.len()
        );
    }

    if !report.errors.is_empty() {
        println!();
        println!("{} ({}):", "Errors".red().bold(), report.errors.len());
        for err in report.errors.iter().take(5) {
            println!("  {} {}: {}", "•".red(), err.path.display(), err.message);
        }
        if report.errors.len() > 5 {
            println!("  ... and {} more", report.errors.len() - 5);
        }
    }

    print_notes("Warnings".yellow().bold(), &report.warnings);

    let stats = sextant.shutdown();
    if stats.degraded > 0 {
        println!();
        println!(
            "{}: {} cache operations fell back to pass-through",
            "Degraded".yellow(),
            stats.degraded
        );
    }
    Ok(())
}
