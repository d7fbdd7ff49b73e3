//! Kelly backtest engine.
//!
//! Replays one fold's evaluation rows in chronological order, sizing each
//! wager with fractional Kelly against the running bankroll and settling it
//! against the realized outcome.
//!
//! # Design Principles
//!
//! 1. **Every decision is recorded**: zero stakes (no edge, invalid odds,
//!    bankrupt) produce ledger entries with their reason.
//!
//! 2. **Missing odds are skipped**: a row without a market produces no entry
//!    and is counted in `skipped_missing_odds`.
//!
//! 3. **Deterministic**: identical inputs yield identical ledgers, down to
//!    the serialized bytes.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use matchday_core::kelly::PROBABILITY_DP;
use matchday_core::{BacktestConfig, KellySizer, ObservationRow};

use crate::ledger::{BankrollLedger, LedgerEntry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacktestError {
    #[error("{probabilities} probabilities for {rows} rows")]
    LengthMismatch { probabilities: usize, rows: usize },

    #[error("{indices} row indices for {rows} rows")]
    IndexMismatch { indices: usize, rows: usize },

    #[error("starting bankroll must be positive, got {0}")]
    NonPositiveBankroll(Decimal),

    #[error("risk fraction must be positive, got {0}")]
    InvalidRiskFraction(Decimal),

    #[error("bankroll exceeded {limit} at row {row_index}")]
    BankrollOverflow { row_index: usize, limit: Decimal },
}

/// Largest bankroll a fold may reach, 1e20.
///
/// Keeps ledger totals summed over many entries and folds inside `Decimal`.
pub const BANKROLL_LIMIT: Decimal = Decimal::from_parts(1_661_992_960, 1_808_227_885, 5, false, 0);


#[derive(Debug, Clone)]
pub struct BacktestEngine {
    starting_bankroll: Decimal,
    sizer: KellySizer,
}

impl BacktestEngine {
    /// Creates an engine from the backtest configuration.
    ///
    /// # Errors
    /// Rejects a non-positive bankroll or risk fraction.
    pub fn new(config: &BacktestConfig) -> Result<Self, BacktestError> {
        if config.starting_bankroll <= Decimal::ZERO {
            return Err(BacktestError::NonPositiveBankroll(config.starting_bankroll));
        }
        if config.risk_fraction <= Decimal::ZERO {
            return Err(BacktestError::InvalidRiskFraction(config.risk_fraction));
        }
        Ok(Self {
            starting_bankroll: config.starting_bankroll,
            sizer: KellySizer::new(config.risk_fraction),
        })
    }

    #[must_use]
    pub fn starting_bankroll(&self) -> Decimal {
        self.starting_bankroll
    }

    /// Runs the backtest with entries indexed by position in `rows`.
    ///
    /// # Errors
    /// [`BacktestError::LengthMismatch`] if the slices differ in length.
    pub fn run(
        &self,
        probabilities: &[f64],
        rows: &[&ObservationRow],
    ) -> Result<BankrollLedger, BacktestError> {
        let indices: Vec<usize> = (0..rows.len()).collect();
        self.run_indexed(probabilities, rows, &indices)
    }

    /// Runs the backtest, tagging entries with the given table row indices.
    ///
    /// Rows are processed in the order given; callers pass them
    /// chronologically.
    ///
    /// # Errors
    /// Returns an error if the three slices differ in length, or
    /// [`BacktestError::BankrollOverflow`] once compounding passes
    /// [`BANKROLL_LIMIT`].
    pub fn run_indexed(
        &self,
        probabilities: &[f64],
        rows: &[&ObservationRow],
        row_indices: &[usize],
    ) -> Result<BankrollLedger, BacktestError> {
        if probabilities.len() != rows.len() {
            return Err(BacktestError::LengthMismatch {
                probabilities: probabilities.len(),
                rows: rows.len(),
            });
        }
        if row_indices.len() != rows.len() {
            return Err(BacktestError::IndexMismatch {
                indices: row_indices.len(),
                rows: rows.len(),
            });
        }

        let half = Decimal::new(5, 1);
        let two = Decimal::new(2, 0);
        let mut bankroll = self.starting_bankroll;
        let mut entries = Vec::with_capacity(rows.len());
        let mut skipped_missing_odds = 0usize;

        for ((&p, row), &row_index) in probabilities.iter().zip(rows).zip(row_indices) {
            let Some(odds) = row.decimal_odds else {
                skipped_missing_odds += 1;
                continue;
            };

            let decision = self.sizer.size(p, odds, bankroll);
            let probability = Decimal::from_f64(p)
                .map(|d| d.round_dp(PROBABILITY_DP))
                .unwrap_or_default();

            let before = bankroll;
            let stake = decision.stake;
            let settled = if row.label {
                stake.checked_mul(odds).and_then(|won| (before - stake).checked_add(won))
            } else {
                Some(before - stake)
            };
            bankroll = match settled {
                Some(b) if b <= BANKROLL_LIMIT => b,
                _ => {
                    return Err(BacktestError::BankrollOverflow {
                        row_index,
                        limit: BANKROLL_LIMIT,
                    })
                }
            };

            entries.push(LedgerEntry {
                row_index,
                timestamp: row.timestamp,
                probability,
                confidence: ((probability - half).abs() * two).round_dp(PROBABILITY_DP),
                decimal_odds: odds,
                stake,
                full_kelly_fraction: decision.full_kelly_fraction,
                reason: decision.reason,
                outcome: row.label,
                bankroll_before: before,
                bankroll_after: bankroll,
            });
        }

        if skipped_missing_odds > 0 {
            tracing::warn!(skipped = skipped_missing_odds, "Rows without odds were skipped");
        }

        Ok(BankrollLedger::new(
            self.starting_bankroll,
            self.sizer.fraction,
            entries,
            skipped_missing_odds,
        ))
    }
}
