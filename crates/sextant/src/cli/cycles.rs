//! `sextant cycles` command implementation.

use std::path::Path;

use colored::Colorize;

use super::display::print_json;

/// Run the cycles command.
pub fn run(workspace: &Path, json: bool) -> Result<(), sextant::Error> {
    let sextant = super::open_indexed(workspace)?;
    let cycles = sextant.cycles()?;

    if json {
        return print_json(&cycles);
    }

    if cycles.is_empty() {
        println!("{}", "No circular dependencies detected.".green());
        return Ok(());
    }

    println!(
        "Found {} circular dependencies:",
        cycles.len().to_string().red().bold()
    );
    println!();

    for (i, cycle) in cycles.iter().enumerate() {
        println!("  {} {}:", "Cycle".yellow().bold(), i + 1);
        let mut path_str = cycle.nodes.join(" → ");
        if let Some(first) = cycle.nodes.first() {
            path_str.push_str(" → ");
            path_str.push_str(first);
        }
        println!("    {}", path_str.dimmed());
    }

    Ok(())
}
