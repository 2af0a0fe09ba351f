//! Subcommand handlers. Output goes to the given writer so tests can capture it.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ledgerlens_core::{EngineSettings, Transaction};
use ledgerlens_detect::{presets, AnalysisEngine, DetectorRegistry, Strategy};
use serde::Serialize;
use tracing::info;

pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read transactions from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse transactions in {}", path.display()))
}

/// Strategy file first, then `--preset`, then the configured default preset.
pub fn resolve_strategy(
    strategy: Option<&Path>,
    preset: Option<&str>,
    settings: &EngineSettings,
) -> Result<Strategy> {
    if let Some(path) = strategy {
        return Ok(Strategy::from_path(path)?);
    }
    match preset.or(settings.default_preset.as_deref()) {
        Some(name) => {
            info!(preset = %name, "using built-in strategy");
            Ok(presets::load(name)?)
        }
        None => bail!("no strategy given: pass --strategy, --preset or set LEDGERLENS_DEFAULT_PRESET"),
    }
}

pub struct ScoreArgs<'a> {
    pub transactions: &'a Path,
    pub strategy: Option<&'a Path>,
    pub preset: Option<&'a str>,
    pub output: Option<&'a Path>,
    pub sequential: bool,
}

pub fn score(args: ScoreArgs<'_>, settings: &EngineSettings, out: &mut dyn Write) -> Result<()> {
    let transactions = load_transactions(args.transactions)?;
    let strategy = resolve_strategy(args.strategy, args.preset, settings)?;

    let engine = AnalysisEngine::from_settings(settings)
        .with_parallel(settings.parallel && !args.sequential);
    let outcome = engine
        .analyze(&transactions, &strategy)
        .context("analysis failed")?;

    info!(
        transactions = outcome.summary.total_transactions,
        anomalies = outcome.summary.anomaly_count,
        "scoring finished"
    );

    match args.output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&outcome)?;
            fs::write(path, json)
                .with_context(|| format!("failed to write result to {}", path.display()))?;
            writeln!(
                out,
                "{} transactions scored, {} anomalous; result written to {}",
                outcome.summary.total_transactions,
                outcome.summary.anomaly_count,
                path.display()
            )?;
        }
        None => write_json(out, &outcome)?,
    }
    Ok(())
}

/// Print the validation report; an invalid strategy is an error.
pub fn validate(strategy: &Path, transactions: Option<&Path>, out: &mut dyn Write) -> Result<()> {
    let parsed = Strategy::from_path(strategy)?;
    let count = match transactions {
        Some(path) => Some(load_transactions(path)?.len()),
        None => None,
    };

    let report = DetectorRegistry::new().validate(&parsed, count);
    write_json(out, &report)?;
    if !report.valid {
        bail!(
            "strategy {} is invalid ({} errors)",
            strategy.display(),
            report.errors.len()
        );
    }
    Ok(())
}

pub fn detectors(out: &mut dyn Write) -> Result<()> {
    write_json(out, &DetectorRegistry::new().describe())
}

pub fn list_presets(out: &mut dyn Write) -> Result<()> {
    #[derive(Serialize)]
    struct PresetInfo {
        name: &'static str,
        description: &'static str,
        detectors: Vec<String>,
    }

    let infos = presets::all()
        .iter()
        .map(|p| -> Result<PresetInfo> {
            let strategy = p.strategy()?;
            Ok(PresetInfo {
                name: p.name,
                description: p.description,
                detectors: strategy.detectors.iter().map(|d| d.key()).collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    write_json(out, &infos)
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
