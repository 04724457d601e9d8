//! Common display utilities for CLI commands.

use colored::Colorize;
use serde::Serialize;
use sextant::query::LevelMap;

const MAX_DISPLAY_ITEMS: usize = 10;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), sextant::Error> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| sextant::Error::Internal(format!("failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Print node ids grouped by level, truncating long levels.
pub fn print_levels(levels: &LevelMap, empty_message: &str) {
    if levels.is_empty() {
        println!("    {}", empty_message.dimmed());
        return;
    }

    for (level, ids) in levels.iter() {
        println!("    {} {}:", "Level".white().bold(), level);
        for id in ids.iter().take(MAX_DISPLAY_ITEMS) {
            println!("      {} {id}", "•".dimmed());
        }
        if ids.len() > MAX_DISPLAY_ITEMS {
            println!(
                "      {} ... and {} more",
                "•".dimmed(),
                ids.len() - MAX_DISPLAY_ITEMS
            );
        }
    }
}

/// Print a list of messages with a colored heading, showing at most five.
pub fn print_notes(heading: colored::ColoredString, notes: &[String]) {
    if notes.is_empty() {
        return;
    }
    println!();
    println!("{heading} ({}):", notes.len());
    for note in notes.iter().take(5) {
        println!("  {} {note}", "•".dimmed());
    }
    if notes.len() > 5 {
        println!("  ... and {} more", notes.len() - 5);
    }
}
