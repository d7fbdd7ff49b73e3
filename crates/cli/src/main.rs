use clap::{Parser, Subcommand};

mod commands;

use commands::{AuditArgs, RunArgs, SplitArgs};

#[derive(Parser)]
#[command(name = "matchday")]
#[command(about = "Leak-free evaluation and bankroll simulation for win-probability models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and print the report
    Run(RunArgs),
    /// Print the chronological split plan without training
    Split(SplitArgs),
    /// Split and audit for leakage and drift
    Audit(AuditArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_pipeline(args),
        Commands::Split(args) => commands::run_split(args),
        Commands::Audit(args) => commands::run_audit(args),
    }
}
