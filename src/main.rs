mod config;
mod managers;
mod report;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use managers::rotation::RotationEngine;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rsync-rotator")]
#[command(about = "Rotating hard-link backup scheduler built on rsync", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/rsync-rotator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup invocation (mirror + rotation)
    Run {
        /// Print the full command report even on success
        #[arg(long)]
        verbose_report: bool,
    },

    /// Validate the configuration file and required tools
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    managers::logging::init_console_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { verbose_report } => {
            let config = config::load_config(&cli.config)?;
            config::validate_tools(&config)?;

            let engine = RotationEngine::new(config)?;
            match engine.run() {
                Ok(report) => {
                    if verbose_report {
                        print!("{}", report.render());
                    }
                    Ok(())
                }
                Err(e) => {
                    // An aborted run still produced a partial command log;
                    // surface it before failing.
                    if let Some(report) = e.partial_report() {
                        eprint!("{}", report);
                    }
                    Err(e.into())
                }
            }
        }
        Commands::Validate => {
            let config = config::load_config(&cli.config)?;
            config::validate_tools(&config)?;
            println!(
                "Configuration OK: {} -> {:?} ({} buckets, {} mysql targets)",
                config.source,
                config.dest,
                config.buckets.len(),
                config.mysql.targets.len()
            );
            Ok(())
        }
    }
}
