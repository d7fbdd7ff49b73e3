//! Split plan inspection.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use matchday_backtest::{ChronologicalSplitter, SplitPlan};
use matchday_core::ObservationRow;

use super::loader::load_rows;
use super::InputArgs;

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

pub fn run_split(args: SplitArgs) -> Result<()> {
    let config = args.input.load_config()?;
    let rows = load_rows(&args.input.data)?;

    let plan = ChronologicalSplitter::new(config.split)?.split(&rows)?;
    println!("{}", format_plan(&plan, &rows));
    Ok(())
}

pub(crate) fn format_plan(plan: &SplitPlan, rows: &[ObservationRow]) -> String {
    let mut output = format!("Split plan ({:?}, {} folds)\n", plan.strategy, plan.num_folds());
    output.push_str("fold  train   eval   train period              eval period\n");

    for fold in &plan.folds {
        output.push_str(&format!(
            "{:>4}  {:>5}  {:>5}   {:<24}  {}\n",
            fold.fold_number,
            fold.train_len(),
            fold.eval_len(),
            period(fold.train_range(rows)),
            period(fold.eval_range(rows)),
        ));
    }
    output
}

fn period(range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> String {
    range.map_or_else(
        || "-".to_string(),
        |(start, end)| format!("{} .. {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d")),
    )
}
