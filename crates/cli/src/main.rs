mod cli;
mod commands;

use std::io;

use anyhow::Result;
use clap::Parser;
use ledgerlens_core::config::{load_dotenv, EngineSettings};

use crate::cli::{CliArgs, Command};
use crate::commands::ScoreArgs;

fn main() -> Result<()> {
    load_dotenv();
    let settings = EngineSettings::from_env();

    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = CliArgs::parse();
    settings.log_summary();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Score {
            transactions,
            strategy,
            preset,
            output,
            sequential,
        } => commands::score(
            ScoreArgs {
                transactions: &transactions,
                strategy: strategy.as_deref(),
                preset: preset.as_deref(),
                output: output.as_deref(),
                sequential,
            },
            &settings,
            &mut out,
        ),
        Command::Validate {
            strategy,
            transactions,
        } => commands::validate(&strategy, transactions.as_deref(), &mut out),
        Command::Detectors => commands::detectors(&mut out),
        Command::Presets => commands::list_presets(&mut out),
    }
}
