//! `sextant impact` command implementation.

use std::path::Path;

use colored::Colorize;
use sextant::ImpactRequest;

use super::display::{print_json, print_levels};

/// Run the impact command.
pub fn run(workspace: &Path, request: &ImpactRequest, json: bool) -> Result<(), sextant::Error> {
    let sextant = super::open_indexed(workspace)?;
    let impact = sextant.impact(request)?;

    if json {
        return print_json(&impact);
    }

    println!("Impact analysis for {}:", impact.target_node.cyan().bold());

    if let Some(upstream) = &impact.upstream {
        println!();
        println!(
            "  {} ({} components):",
            "Upstream dependents".white().bold(),
            impact.total_upstream.to_string().yellow()
        );
        print_levels(upstream, "(none)");
    }

    if let Some(downstream) = &impact.downstream {
        println!();
        println!(
            "  {} ({} components):",
            "Downstream dependencies".white().bold(),
            impact.total_downstream.to_string().green()
        );
        print_levels(downstream, "(none)");
    }

    Ok(())
}
