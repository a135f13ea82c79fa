//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::MasteringPreset;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

const AFTER_HELP: &str = "\
Quick Start:
  $ tapewatch init                         # Write .tapewatch/settings.toml
  $ tapewatch watch -w ./incoming          # Process new and changed files
  $ tapewatch watch -w a -w b --workers 4  # Several folders, more workers
  $ tapewatch scan ./backlog               # Process what is already there";

/// Watch folders and feed new audio files through the mastering pipeline
#[derive(Parser, Debug)]
#[command(
    name = "tapewatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch folders and process new audio files",
    long_about = "Watch folders for new or changed audio files and run them through the \
                  processing pipeline with a bounded priority queue and a fixed worker pool.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .tapewatch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    #[command(about = "Display active settings")]
    Config,

    /// Watch folders until interrupted
    #[command(about = "Watch folders and process files as they appear")]
    Watch {
        /// Folder to watch (repeatable, adds to `watch.folders`)
        #[arg(short = 'w', long = "watch", value_name = "DIR")]
        folders: Vec<PathBuf>,

        /// Number of worker threads (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Queue files already in the folders at low priority
        #[arg(long)]
        process_existing: bool,

        /// Do not back up originals
        #[arg(long)]
        no_backup: bool,

        /// Mastering preset (overrides config)
        #[arg(long, value_enum)]
        preset: Option<MasteringPreset>,

        /// JSONL file receiving one record per outcome
        #[arg(long, value_name = "FILE")]
        outcome_log: Option<PathBuf>,

        /// Seconds between status lines, 0 to disable
        #[arg(long, default_value_t = 30)]
        stats_interval: u64,
    },

    /// Process existing files once
    #[command(about = "Process the files already in a folder, then exit")]
    Scan {
        /// Folder to scan
        #[arg(value_name = "DIR")]
        folder: PathBuf,

        /// Number of worker threads (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// JSONL file receiving one record per outcome
        #[arg(long, value_name = "FILE")]
        outcome_log: Option<PathBuf>,
    },
}
