use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Score transaction batches for anomalies.
///
/// Reads a cleaned JSON batch (`[{id, amount, timestamp, account_id}]`) and a
/// YAML or JSON strategy, runs the configured detectors and prints one
/// verdict per transaction.
#[derive(Parser, Debug)]
#[command(name = "ledgerlens", version, about, disable_help_subcommand = true)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a strategy over a transaction batch.
    Score {
        /// JSON file holding the transaction batch
        #[arg(long)]
        transactions: PathBuf,

        /// Strategy file (.yml/.yaml or .json)
        #[arg(long, conflicts_with = "preset")]
        strategy: Option<PathBuf>,

        /// Built-in strategy to use instead of a file
        /// (falls back to `LEDGERLENS_DEFAULT_PRESET`)
        #[arg(long)]
        preset: Option<String>,

        /// Write the result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Run detectors one after another
        #[arg(long)]
        sequential: bool,
    },

    /// Check a strategy without scoring anything.
    Validate {
        #[arg(long)]
        strategy: PathBuf,

        /// Batch used to check detector minimum sizes
        #[arg(long)]
        transactions: Option<PathBuf>,
    },

    /// List available detectors with their default configuration.
    Detectors,

    /// List built-in strategies.
    Presets,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_score() {
        let args = CliArgs::try_parse_from([
            "ledgerlens",
            "score",
            "--transactions",
            "tx.json",
            "--strategy",
            "s.yml",
            "--sequential",
        ])
        .unwrap();
        match args.command {
            Command::Score {
                transactions,
                strategy,
                sequential,
                output,
                ..
            } => {
                assert_eq!(transactions, PathBuf::from("tx.json"));
                assert_eq!(strategy, Some(PathBuf::from("s.yml")));
                assert!(sequential);
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn strategy_and_preset_conflict() {
        let res = CliArgs::try_parse_from([
            "ledgerlens",
            "score",
            "--transactions",
            "tx.json",
            "--strategy",
            "s.yml",
            "--preset",
            "comprehensive",
        ]);
        assert!(res.is_err());
    }
}
