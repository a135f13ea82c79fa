use anyhow::Context;
use clap::Parser;
use tapewatch::Settings;
use tapewatch::cli::commands::{init, scan, watch};
use tapewatch::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return init::run_init(force);
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("cannot load settings from {}", path.display()))?,
        None => Settings::load().context("cannot load settings")?,
    };

    tapewatch::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Config => init::run_config(&settings),
        Commands::Watch {
            folders,
            workers,
            process_existing,
            no_backup,
            preset,
            outcome_log,
            stats_interval,
        } => watch::run_watch(
            settings,
            watch::WatchOptions {
                folders,
                workers,
                process_existing,
                no_backup,
                preset,
                outcome_log,
                stats_interval,
            },
        ),
        Commands::Scan {
            folder,
            workers,
            outcome_log,
        } => scan::run_scan(settings, folder, workers, outcome_log),
    }
}
