//! Sextant CLI - Dependency queries over layered web codebases.
//!
//! Sextant reads per-file fact sidecars (`*.<kind>.json`), caches them under
//! `.sextant/cache`, and answers chain and impact questions over the
//! resulting component graph.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod cli;

/// Sextant: Dependency index and structural queries.
#[derive(Parser)]
#[command(name = "sextant")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Print results as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze fact files and build the dependency graph
    Index {
        /// Re-extract every file, ignoring cached facts
        #[arg(long)]
        force: bool,
    },

    /// Find call chains from one component to another
    Chain {
        /// Starting component
        start: String,

        /// Target component (omit to list direct successors)
        end: Option<String>,

        /// Maximum number of hops (1-20)
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,

        /// Maximum number of chains to return
        #[arg(short = 'n', long)]
        max_paths: Option<usize>,
    },

    /// Show what depends on a component and what it depends on
    Impact {
        /// Component to analyze
        node: String,

        /// Which side to walk: upstream, downstream or both
        #[arg(long)]
        direction: Option<sextant::Direction>,

        /// Maximum number of levels (1-20)
        #[arg(short = 'd', long)]
        max_depth: Option<usize>,
    },

    /// Detect circular dependencies
    Cycles,

    /// Delete superseded cache entries
    Prune,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let workspace = match cli.workspace {
        Some(w) => w,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!(
                    "{}: failed to get current directory: {e}",
                    "error".red().bold()
                );
                return ExitCode::FAILURE;
            }
        },
    };

    let json = cli.json;
    let result = match cli.command {
        Commands::Index { force } => cli::index::run(&workspace, force, json),
        Commands::Chain {
            start,
            end,
            max_depth,
            max_paths,
        } => {
            let mut request = match end {
                Some(end) => sextant::ChainRequest::between(start, end),
                None => sextant::ChainRequest::neighbors(start),
            };
            request.max_depth = max_depth;
            request.max_paths = max_paths;
            cli::chain::run(&workspace, &request, json)
        }
        Commands::Impact {
            node,
            direction,
            max_depth,
        } => {
            let mut request = sextant::ImpactRequest::new(node);
            request.direction = direction;
            request.max_depth = max_depth;
            cli::impact::run(&workspace, &request, json)
        }
        Commands::Cycles => cli::cycles::run(&workspace, json),
        Commands::Prune => cli::prune::run(&workspace, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  {}: {cause}", "caused by".dimmed());
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}
