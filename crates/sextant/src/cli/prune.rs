//! `sextant prune` command implementation.

use std::path::Path;

use colored::Colorize;
use serde_json::json;

use super::display::print_json;

/// Run the prune command.
///
/// Indexes first so the cache knows the current entry for every file;
/// everything else on disk is superseded.
pub fn run(workspace: &Path, json: bool) -> Result<(), sextant::Error> {
    let sextant = super::open_indexed(workspace)?;
    let removed = sextant.cache().prune()?;

    if json {
        return print_json(&json!({ "removed": removed }));
    }

    match sextant.cache().root() {
        Some(root) => println!(
            "{} {} superseded entries from {}",
            "Pruned".green().bold(),
            removed,
            root.display()
        ),
        None => println!("{}", "Cache is not persisted; nothing to prune.".dimmed()),
    }
    Ok(())
}
