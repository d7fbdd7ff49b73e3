//! Kelly Criterion implementation for decimal-odds wagers.
//!
//! Provides fractional Kelly sizing against a current bankroll with explicit,
//! recorded reasons for every zero-stake decision.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places kept when a model probability enters money arithmetic.
pub const PROBABILITY_DP: u32 = 10;

/// Kelly Criterion stake sizer for decimal-odds wagers.
///
/// With win probability `p`, loss probability `q = 1 - p` and net odds
/// `b = decimal_odds - 1`, the full Kelly fraction is:
/// ```text
/// f* = (p*b - q) / b
/// ```
/// The stake is `fraction * f* * bankroll`, capped at the bankroll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellySizer {
    /// Fraction of Kelly to use (0.25 = quarter Kelly).
    pub fraction: Decimal,
}

impl Default for KellySizer {
    fn default() -> Self {
        Self {
            fraction: Decimal::new(25, 2), // 0.25 (quarter Kelly)
        }
    }
}

/// Result of a Kelly sizing calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetDecision {
    /// Stake to place, zero when no wager is made.
    pub stake: Decimal,
    /// Full Kelly fraction before the risk multiplier.
    pub full_kelly_fraction: Decimal,
    /// Why the stake has its value.
    pub reason: StakeReason,
}

impl BetDecision {
    fn zero(reason: StakeReason, full_kelly_fraction: Decimal) -> Self {
        Self {
            stake: Decimal::ZERO,
            full_kelly_fraction,
            reason,
        }
    }

    /// Returns true if money goes on the table.
    #[must_use]
    pub fn should_bet(&self) -> bool {
        self.stake > Decimal::ZERO
    }
}

/// Reason attached to every sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeReason {
    /// Positive edge, fractional Kelly stake placed.
    PositiveEdge,
    /// Positive edge, but the stake was capped at the whole bankroll.
    CappedAtBankroll,
    /// `f* <= 0`: the model sees no edge at these odds.
    NoEdge,
    /// Decimal odds at or below 1.0 pay nothing.
    InvalidOdds,
    /// Probability is not a finite number in [0, 1].
    InvalidProbability,
    /// Bankroll is exhausted; no further wagers.
    Bankrupt,
}

impl StakeReason {
    /// Short label for exports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PositiveEdge => "positive_edge",
            Self::CappedAtBankroll => "capped_at_bankroll",
            Self::NoEdge => "no_edge",
            Self::InvalidOdds => "invalid_odds",
            Self::InvalidProbability => "invalid_probability",
            Self::Bankrupt => "bankrupt",
        }
    }
}

impl KellySizer {
    /// Creates a sizer with the given Kelly multiplier.
    #[must_use]
    pub fn new(fraction: Decimal) -> Self {
        Self { fraction }
    }

    /// Full Kelly fraction for a decimal-odds wager.
    ///
    /// Returns `None` when the net odds are not positive.
    #[must_use]
    pub fn full_kelly(win_prob: Decimal, decimal_odds: Decimal) -> Option<Decimal> {
        let net_odds = decimal_odds - Decimal::ONE;
        if net_odds <= Decimal::ZERO {
            return None;
        }
        let lose_prob = Decimal::ONE - win_prob;
        Some((win_prob * net_odds - lose_prob) / net_odds)
    }

    /// Sizes a wager using fractional Kelly.
    ///
    /// # Arguments
    /// * `win_prob` - Model probability that this side wins (0 to 1)
    /// * `decimal_odds` - Decimal odds offered (stake returned included)
    /// * `bankroll` - Current bankroll
    ///
    /// # Examples
    /// ```
    /// use matchday_core::kelly::KellySizer;
    /// use rust_decimal_macros::dec;
    ///
    /// let sizer = KellySizer::default();
    /// let decision = sizer.size(0.55, dec!(2.0), dec!(1000));
    ///
    /// // f* = (0.55 * 1 - 0.45) / 1 = 0.10, quarter Kelly of 1000
    /// assert_eq!(decision.stake, dec!(25));
    /// ```
    #[must_use]
    pub fn size(&self, win_prob: f64, decimal_odds: Decimal, bankroll: Decimal) -> BetDecision {
        if bankroll <= Decimal::ZERO {
            return BetDecision::zero(StakeReason::Bankrupt, Decimal::ZERO);
        }

        let p = match Decimal::from_f64(win_prob) {
            Some(p) if (0.0..=1.0).contains(&win_prob) => p.round_dp(PROBABILITY_DP),
            _ => return BetDecision::zero(StakeReason::InvalidProbability, Decimal::ZERO),
        };

        let full_kelly = match Self::full_kelly(p, decimal_odds) {
            Some(f) => f,
            None => return BetDecision::zero(StakeReason::InvalidOdds, Decimal::ZERO),
        };

        if full_kelly <= Decimal::ZERO {
            return BetDecision::zero(StakeReason::NoEdge, full_kelly);
        }

        // A product too large for Decimal already exceeds the bankroll.
        let stake = self
            .fraction
            .checked_mul(full_kelly)
            .and_then(|k| bankroll.checked_mul(k));
        let Some(stake) = stake.filter(|&s| s <= bankroll) else {
            return BetDecision {
                stake: bankroll,
                full_kelly_fraction: full_kelly,
                reason: StakeReason::CappedAtBankroll,
            };
        };

        BetDecision {
            stake,
            full_kelly_fraction: full_kelly,
            reason: StakeReason::PositiveEdge,
        }
    }
}
