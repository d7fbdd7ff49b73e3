//! Leakage and drift audit without training.

use anyhow::{bail, Result};
use clap::Args;

use matchday_backtest::{AuditResult, ChronologicalSplitter, LeakageAuditor};

use super::loader::load_rows;
use super::split::format_plan;
use super::InputArgs;

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run_audit(args: AuditArgs) -> Result<()> {
    let config = args.input.load_config()?;
    let rows = load_rows(&args.input.data)?;

    let plan = ChronologicalSplitter::new(config.split.clone())?.split(&rows)?;
    let result = LeakageAuditor::new(config.audit).audit(&plan, &rows);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_plan(&plan, &rows));
        println!("{}", format_audit(&result));
    }

    if !result.passed {
        bail!("Leakage detected in {} place(s)", result.violations.len());
    }
    Ok(())
}

fn format_audit(result: &AuditResult) -> String {
    let mut output = format!(
        "Audit: {}\n",
        if result.passed { "PASSED" } else { "FAILED" }
    );
    for violation in &result.violations {
        output.push_str(&format!("  violation: {violation}\n"));
    }
    for drift in &result.drift {
        output.push_str(&format!(
            "  fold {:>2} max PSI {:.3}{}\n",
            drift.fold_number,
            drift.max_psi,
            if drift.high_risk { "  HIGH RISK" } else { "" }
        ));
    }
    for advisory in &result.advisories {
        output.push_str(&format!("  advisory: {advisory}\n"));
    }
    output
}
