//! Bankroll ledgers and their summary statistics.
//!
//! A [`BankrollLedger`] is the ordered record of every sizing decision the
//! backtest engine made for one fold. Summary statistics are computed once,
//! after the ledger is complete, from the entries alone.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use matchday_core::{wilson_ci, StakeReason};

/// One sizing decision and its settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Index of the row in the input table.
    pub row_index: usize,
    pub timestamp: DateTime<Utc>,
    /// Blended win probability, rounded for money arithmetic.
    pub probability: Decimal,
    /// `|p - 0.5| * 2`.
    pub confidence: Decimal,
    pub decimal_odds: Decimal,
    pub stake: Decimal,
    pub full_kelly_fraction: Decimal,
    pub reason: StakeReason,
    pub outcome: bool,
    pub bankroll_before: Decimal,
    pub bankroll_after: Decimal,
}

impl LedgerEntry {
    /// Profit or loss of this entry.
    #[must_use]
    pub fn pnl(&self) -> Decimal {
        self.bankroll_after - self.bankroll_before
    }

    /// True when a non-zero stake was placed.
    #[must_use]
    pub fn is_settled_bet(&self) -> bool {
        self.stake > Decimal::ZERO
    }
}

/// Post-hoc statistics over a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub starting_bankroll: Decimal,
    pub final_bankroll: Decimal,
    pub peak_bankroll: Decimal,
    pub net_profit: Decimal,
    pub total_staked: Decimal,
    pub entries: usize,
    pub bets_placed: usize,
    pub wins: usize,
    pub skipped_missing_odds: usize,
    /// Wins over bets placed.
    pub win_rate: f64,
    pub win_rate_ci_lower: f64,
    pub win_rate_ci_upper: f64,
    /// Gross winnings over gross losses on settled bets; `None` without losses.
    pub profit_factor: Option<Decimal>,
    /// Net profit over total staked.
    pub roi: Decimal,
    /// `(final - start) / start`.
    pub total_return: Decimal,
    pub max_drawdown: Decimal,
    /// Largest drawdown as a fraction of the running peak.
    pub max_drawdown_fraction: Decimal,
}

impl LedgerSummary {
    /// Computes statistics over `entries` replayed from `starting_bankroll`.
    ///
    /// Equity moves by each entry's P&L, so entries from several folds can be
    /// chained into one equity path.
    #[must_use]
    pub fn from_entries<'a>(
        starting_bankroll: Decimal,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
        skipped_missing_odds: usize,
    ) -> Self {
        let mut equity = starting_bankroll;
        let mut peak = starting_bankroll;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_fraction = Decimal::ZERO;

        let mut count = 0usize;
        let mut bets_placed = 0usize;
        let mut wins = 0usize;
        let mut total_staked = Decimal::ZERO;
        let mut gross_won = Decimal::ZERO;
        let mut gross_lost = Decimal::ZERO;

        for entry in entries {
            count += 1;
            equity += entry.pnl();

            if entry.is_settled_bet() {
                bets_placed += 1;
                total_staked += entry.stake;
                if entry.outcome {
                    wins += 1;
                    gross_won += entry.pnl();
                } else {
                    gross_lost += entry.stake;
                }
            }

            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                if peak > Decimal::ZERO {
                    max_drawdown_fraction = drawdown / peak;
                }
            }
        }

        let net_profit = equity - starting_bankroll;
        let win_rate = if bets_placed > 0 {
            wins as f64 / bets_placed as f64
        } else {
            0.0
        };
        let (win_rate_ci_lower, win_rate_ci_upper) = wilson_ci(wins, bets_placed, 1.96);

        let profit_factor = if gross_lost > Decimal::ZERO {
            Some(gross_won / gross_lost)
        } else {
            None
        };
        let roi = if total_staked > Decimal::ZERO {
            net_profit / total_staked
        } else {
            Decimal::ZERO
        };
        let total_return = if starting_bankroll > Decimal::ZERO {
            net_profit / starting_bankroll
        } else {
            Decimal::ZERO
        };

        Self {
            starting_bankroll,
            final_bankroll: equity,
            peak_bankroll: peak,
            net_profit,
            total_staked,
            entries: count,
            bets_placed,
            wins,
            skipped_missing_odds,
            win_rate,
            win_rate_ci_lower,
            win_rate_ci_upper,
            profit_factor,
            roi,
            total_return,
            max_drawdown,
            max_drawdown_fraction,
        }
    }
}

/// All decisions for one fold plus their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankrollLedger {
    pub starting_bankroll: Decimal,
    pub risk_fraction: Decimal,
    pub entries: Vec<LedgerEntry>,
    pub skipped_missing_odds: usize,
    pub summary: LedgerSummary,
}

impl BankrollLedger {
    /// Finalizes a ledger, computing its summary.
    #[must_use]
    pub fn new(
        starting_bankroll: Decimal,
        risk_fraction: Decimal,
        entries: Vec<LedgerEntry>,
        skipped_missing_odds: usize,
    ) -> Self {
        let summary = LedgerSummary::from_entries(starting_bankroll, &entries, skipped_missing_odds);
        Self {
            starting_bankroll,
            risk_fraction,
            entries,
            skipped_missing_odds,
            summary,
        }
    }

    #[must_use]
    pub fn final_bankroll(&self) -> Decimal {
        self.summary.final_bankroll
    }
}

/// A fold's ledger tagged with its fold number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldLedger {
    pub fold_number: usize,
    pub ledger: BankrollLedger,
}

/// Per-fold ledgers merged in fold order.
///
/// Each fold starts from the configured bankroll; the total summary chains
/// fold P&L into a single equity path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedLedger {
    pub folds: Vec<FoldLedger>,
    pub total: LedgerSummary,
}

impl CombinedLedger {
    #[must_use]
    pub fn new(starting_bankroll: Decimal, mut folds: Vec<FoldLedger>) -> Self {
        folds.sort_by_key(|f| f.fold_number);
        let skipped = folds.iter().map(|f| f.ledger.skipped_missing_odds).sum();
        let total = LedgerSummary::from_entries(
            starting_bankroll,
            folds.iter().flat_map(|f| &f.ledger.entries),
            skipped,
        );
        Self { folds, total }
    }

    /// Every entry across folds, in fold order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &LedgerEntry)> {
        self.folds
            .iter()
            .flat_map(|f| f.ledger.entries.iter().map(move |e| (f.fold_number, e)))
    }
}
