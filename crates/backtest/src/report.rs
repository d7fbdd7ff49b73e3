//! Report rendering: text summary, CSV exports and JSON.

#![allow(clippy::format_push_string)]

use std::io::Write;

use anyhow::{Context, Result};
use csv::Writer;
use rust_decimal::Decimal;

use crate::ledger::{CombinedLedger, LedgerSummary};
use crate::pipeline::{FoldReport, PipelineReport, Verdict};
use crate::validator::{CalibrationBin, ValidationReport};

const RULE: &str = "═══════════════════════════════════════════════════════════════\n";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────\n";

const VALIDATION_HEADER: [&str; 8] = [
    "scope",
    "samples",
    "brier_score",
    "log_loss",
    "roc_auc",
    "accuracy",
    "permutation_p_value",
    "permutation_repeats",
];

const CALIBRATION_HEADER: [&str; 7] = [
    "scope",
    "lower",
    "upper",
    "midpoint",
    "count",
    "mean_predicted",
    "observed_rate",
];

const LEDGER_HEADER: [&str; 12] = [
    "fold",
    "row_index",
    "timestamp",
    "probability",
    "confidence",
    "decimal_odds",
    "stake",
    "full_kelly_fraction",
    "reason",
    "outcome",
    "bankroll_before",
    "bankroll_after",
];

pub struct ReportFormatter;

impl ReportFormatter {
    /// Renders per-fold summaries and the overall verdict.
    #[must_use]
    pub fn format(report: &PipelineReport) -> String {
        let mut output = String::new();

        output.push('\n');
        output.push_str(RULE);
        output.push_str(&format!(
            "              EVALUATION REPORT: {}\n",
            report.sport_tag.to_uppercase()
        ));
        output.push_str(RULE);
        output.push('\n');

        output.push_str("Run\n");
        output.push_str(THIN_RULE);
        output.push_str(&format!("Rows:                  {}\n", report.rows));
        output.push_str(&format!("Split Strategy:        {:?}\n", report.strategy));
        output.push_str(&format!(
            "Folds:                 {} completed, {} failed\n",
            report.completed_folds(),
            report.failed_folds()
        ));
        for advisory in &report.audit.advisories {
            output.push_str(&format!("Advisory:              {advisory}\n"));
        }
        let risky = report.audit.high_risk_folds();
        if !risky.is_empty() {
            let folds = risky.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            output.push_str(&format!("High Drift Folds:      {folds}\n"));
        }
        output.push('\n');

        for fold in &report.folds {
            format_fold(&mut output, fold);
        }

        output.push_str("Pooled Validation\n");
        output.push_str(THIN_RULE);
        match &report.pooled {
            Some(v) => format_validation(&mut output, v),
            None => output.push_str("N/A (no fold produced predictions)\n"),
        }
        output.push('\n');

        output.push_str("Combined Backtest\n");
        output.push_str(THIN_RULE);
        format_ledger(&mut output, &report.ledger.total);
        output.push('\n');

        output.push_str(RULE);
        output.push_str(&format!("Verdict:               {}\n", report.verdict.as_str()));
        if let Some(checks) = &report.checks {
            let t = &report.thresholds;
            output.push_str(&format!(
                "  Brier < {:.2}:         {}\n",
                t.max_brier,
                mark(checks.brier)
            ));
            output.push_str(&format!(
                "  ROC-AUC > {:.2}:       {}\n",
                t.min_roc_auc,
                mark(checks.roc_auc)
            ));
            output.push_str(&format!(
                "  p-value < {:.2}:       {}\n",
                t.max_p_value,
                mark(checks.p_value)
            ));
            output.push_str(&format!(
                "  ROI > {:.2}%:          {}\n",
                t.min_roi * Decimal::from(100),
                mark(checks.roi)
            ));
        }
        output.push_str(RULE);

        if report.verdict == Verdict::Inconclusive {
            output.push_str("\n⚠️  No fold completed; the verdict could not be evaluated.\n\n");
        }

        output
    }
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "pass"
    } else {
        "FAIL"
    }
}

fn format_fold(output: &mut String, fold: &FoldReport) {
    output.push_str(&format!("Fold {}\n", fold.fold_number));
    output.push_str(THIN_RULE);
    output.push_str(&format!(
        "Train / Eval Rows:     {} / {}\n",
        fold.train_size, fold.eval_size
    ));
    if let (Some(start), Some(end)) = (fold.eval_start, fold.eval_end) {
        output.push_str(&format!(
            "Eval Period:           {} to {}\n",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ));
    }
    if let Some(drift) = &fold.drift {
        output.push_str(&format!(
            "Max PSI:               {:.3}{}\n",
            drift.max_psi,
            if drift.high_risk { " (high risk)" } else { "" }
        ));
    }

    if let Some(failure) = &fold.failure {
        output.push_str(&format!("Failed:                {failure}\n\n"));
        return;
    }

    let weights = fold
        .models
        .iter()
        .filter(|m| m.weight > 0.0)
        .map(|m| format!("{}={:.2}", m.model_id, m.weight))
        .collect::<Vec<_>>()
        .join(", ");
    output.push_str(&format!("Weights:               {weights}\n"));

    if let Some(v) = &fold.validation {
        format_validation(output, v);
    }
    if let Some(summary) = &fold.backtest {
        format_ledger(output, summary);
    }
    output.push('\n');
}

fn format_validation(output: &mut String, v: &ValidationReport) {
    output.push_str(&format!("Brier Score:           {:.4}\n", v.brier_score));
    output.push_str(&format!("Log Loss:              {:.4}\n", v.log_loss));
    match v.roc_auc {
        Some(auc) => output.push_str(&format!("ROC-AUC:               {auc:.4}\n")),
        None => output.push_str("ROC-AUC:               N/A (single class)\n"),
    }
    output.push_str(&format!("Accuracy:              {:.2}%\n", v.accuracy * 100.0));
    output.push_str(&format!(
        "Permutation p-value:   {:.4} ({} repeats)\n",
        v.permutation_p_value, v.permutation_repeats
    ));
    if !v.calibration.is_empty() {
        output.push_str("Calibration:           bin   count  predicted  observed\n");
        for bin in &v.calibration {
            format_bin(output, bin);
        }
    }
}

fn format_bin(output: &mut String, bin: &CalibrationBin) {
    output.push_str(&format!(
        "                       {:.2}  {:>5}  {:>9.3}  {:>8.3}\n",
        bin.midpoint, bin.count, bin.mean_predicted, bin.observed_rate
    ));
}

fn format_ledger(output: &mut String, s: &LedgerSummary) {
    let hundred = Decimal::from(100);
    output.push_str(&format!(
        "Bankroll:              ${:.2} -> ${:.2}\n",
        s.starting_bankroll, s.final_bankroll
    ));
    output.push_str(&format!("Bets Placed:           {}\n", s.bets_placed));
    if s.bets_placed > 0 {
        output.push_str(&format!(
            "Win Rate:              {:.2}% (95% CI {:.2}%-{:.2}%)\n",
            s.win_rate * 100.0,
            s.win_rate_ci_lower * 100.0,
            s.win_rate_ci_upper * 100.0
        ));
    } else {
        output.push_str("Win Rate:              N/A (no bets)\n");
    }
    output.push_str(&format!("ROI:                   {:.2}%\n", s.roi * hundred));
    match s.profit_factor {
        Some(pf) => output.push_str(&format!("Profit Factor:         {pf:.2}\n")),
        None => output.push_str("Profit Factor:         N/A (no losses)\n"),
    }
    output.push_str(&format!(
        "Max Drawdown:          ${:.2} ({:.2}%)\n",
        s.max_drawdown,
        s.max_drawdown_fraction * hundred
    ));
    if s.skipped_missing_odds > 0 {
        output.push_str(&format!(
            "Skipped (no odds):     {}\n",
            s.skipped_missing_odds
        ));
    }
}

/// Writes one CSV row per fold with scores, plus a `pooled` row when present.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_validation_csv<W: Write>(writer: W, report: &PipelineReport) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(VALIDATION_HEADER)?;

    for fold in &report.folds {
        if let Some(v) = &fold.validation {
            writer.write_record(validation_record(&format!("fold_{}", fold.fold_number), v))?;
        }
    }
    if let Some(v) = &report.pooled {
        writer.write_record(validation_record("pooled", v))?;
    }

    writer.flush().context("Failed to flush validation CSV")?;
    Ok(())
}

fn validation_record(scope: &str, v: &ValidationReport) -> [String; 8] {
    [
        scope.to_string(),
        v.samples.to_string(),
        v.brier_score.to_string(),
        v.log_loss.to_string(),
        v.roc_auc.map(|a| a.to_string()).unwrap_or_default(),
        v.accuracy.to_string(),
        v.permutation_p_value.to_string(),
        v.permutation_repeats.to_string(),
    ]
}

/// Writes the non-empty calibration bins of every fold, then the pooled bins.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_calibration_csv<W: Write>(writer: W, report: &PipelineReport) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(CALIBRATION_HEADER)?;

    let scoped = report
        .folds
        .iter()
        .filter_map(|f| f.validation.as_ref().map(|v| (format!("fold_{}", f.fold_number), v)))
        .chain(report.pooled.as_ref().map(|v| ("pooled".to_string(), v)));

    for (scope, v) in scoped {
        for bin in &v.calibration {
            writer.write_record(&[
                scope.clone(),
                bin.lower.to_string(),
                bin.upper.to_string(),
                bin.midpoint.to_string(),
                bin.count.to_string(),
                bin.mean_predicted.to_string(),
                bin.observed_rate.to_string(),
            ])?;
        }
    }

    writer.flush().context("Failed to flush calibration CSV")?;
    Ok(())
}

/// Writes every ledger entry in fold order, then a trailing summary record.
///
/// The summary record has `summary` in the `fold` column and
/// `key=value` pairs for max drawdown, win rate, profit factor and ROI.
///
/// # Errors
/// Returns an error if writing fails.
pub fn write_ledger_csv<W: Write>(writer: W, ledger: &CombinedLedger) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(LEDGER_HEADER)?;

    for (fold_number, entry) in ledger.entries() {
        writer.write_record(&[
            fold_number.to_string(),
            entry.row_index.to_string(),
            entry.timestamp.to_rfc3339(),
            entry.probability.to_string(),
            entry.confidence.to_string(),
            entry.decimal_odds.to_string(),
            entry.stake.to_string(),
            entry.full_kelly_fraction.to_string(),
            entry.reason.as_str().to_string(),
            entry.outcome.to_string(),
            entry.bankroll_before.to_string(),
            entry.bankroll_after.to_string(),
        ])?;
    }

    let total = &ledger.total;
    let mut summary = vec![
        "summary".to_string(),
        format!("max_drawdown={}", total.max_drawdown),
        format!("max_drawdown_fraction={}", total.max_drawdown_fraction),
        format!("win_rate={}", total.win_rate),
        format!(
            "profit_factor={}",
            total
                .profit_factor
                .map(|pf| pf.to_string())
                .unwrap_or_default()
        ),
        format!("roi={}", total.roi),
        format!("final_bankroll={}", total.final_bankroll),
    ];
    summary.resize(LEDGER_HEADER.len(), String::new());
    writer.write_record(&summary)?;

    writer.flush().context("Failed to flush ledger CSV")?;
    Ok(())
}

/// Pretty-printed JSON of the full report.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn to_json(report: &PipelineReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize pipeline report")
}
