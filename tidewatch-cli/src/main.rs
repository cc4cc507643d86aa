//! Tidewatch CLI - headless host for the live vessel tracking engine.
//!
//! `tidewatch run` connects the engine to the configured feeds and logs each
//! published snapshot; `tidewatch config-path` prints where the config file
//! is read from.

mod commands;
mod error;
mod surface;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(name = "tidewatch", version, about = "Live vessel position engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the engine until Ctrl+C
    Run(RunArgs),

    /// Show the configuration file path
    ConfigPath,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::ConfigPath => commands::config::run_path(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
