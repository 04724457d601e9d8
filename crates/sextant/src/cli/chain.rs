//! `sextant chain` command implementation.

use std::path::Path;

use colored::Colorize;
use sextant::{Chain, ChainRequest};

use super::display::print_json;

/// Run the chain command.
pub fn run(workspace: &Path, request: &ChainRequest, json: bool) -> Result<(), sextant::Error> {
    let sextant = super::open_indexed(workspace)?;
    let result = sextant.find_chain(request)?;

    if json {
        return print_json(&result);
    }

    let title = match &request.end {
        Some(end) => format!("{} → {}", request.start, end),
        None => format!("{} → *", request.start),
    };
    if result.chains.is_empty() {
        println!("No chains found for {}.", title.cyan().bold());
        return Ok(());
    }

    println!(
        "Found {} chains for {}:",
        result.total_chains.to_string().green().bold(),
        title.cyan().bold()
    );
    println!();
    for chain in &result.chains {
        println!("  {} {}", format!("[{}]", chain.depth).dimmed(), render(chain));
    }
    Ok(())
}

/// Render a chain as `A -calls-> B -maps_to-> C`.
fn render(chain: &Chain) -> String {
    let mut out = String::new();
    for (i, id) in chain.path.iter().enumerate() {
        if i > 0 {
            let kind = chain
                .edge_types
                .get(i - 1)
                .map_or("?", |k| k.as_str());
            out.push_str(&format!(" -{}-> ", kind.to_ascii_lowercase()).dimmed().to_string());
        }
        out.push_str(id);
    }
    out
}
