//! Full pipeline run.

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Args;

use matchday_backtest::{report, PipelineOrchestrator, Verdict};

use super::loader::load_rows;
use super::InputArgs;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Evaluate folds on a worker pool
    #[arg(long)]
    pub parallel: bool,

    /// Output format: text, json (default: text)
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Directory for validation.csv, calibration.csv, ledger.csv and report.json
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Output format for pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!(
                "Unknown format: '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

pub fn run_pipeline(args: RunArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let mut config = args.input.load_config()?;
    config.parallel |= args.parallel;

    let rows = load_rows(&args.input.data)?;
    tracing::info!(
        sport = %config.sport_tag,
        strategy = ?config.split.strategy,
        folds = config.split.n_folds,
        parallel = config.parallel,
        "Starting pipeline"
    );

    let orchestrator = PipelineOrchestrator::new(config)?;
    let result = orchestrator.run(rows)?;

    match format {
        OutputFormat::Text => println!("{}", report::ReportFormatter::format(&result)),
        OutputFormat::Json => println!("{}", report::to_json(&result)?),
    }

    if let Some(dir) = &args.output {
        write_outputs(Path::new(dir), &result)?;
    }

    if result.verdict == Verdict::Inconclusive {
        tracing::warn!("No fold completed; verdict is inconclusive");
    }
    Ok(())
}

fn write_outputs(dir: &Path, result: &matchday_backtest::PipelineReport) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let path = dir.join("validation.csv");
    let file = File::create(&path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    report::write_validation_csv(file, result)?;

    let path = dir.join("calibration.csv");
    let file = File::create(&path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    report::write_calibration_csv(file, result)?;

    let path = dir.join("ledger.csv");
    let file = File::create(&path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    report::write_ledger_csv(file, &result.ledger)?;

    let path = dir.join("report.json");
    std::fs::write(&path, report::to_json(result)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!(dir = %dir.display(), "Reports written");
    Ok(())
}
